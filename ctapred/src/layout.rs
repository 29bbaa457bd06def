//! Sets constants for the on-disk CTA entry table
//!
//! All integers are big endian. Identifiers are ASCII, length-prefixed.


pub const MAGIC: [u8; 4] = *b"CTAD";
pub const FORMAT_VERSION: u16 = 1;

//file header
pub const MAGIC_START: usize = 0;
pub const MAGIC_SIZE: usize = 4;

pub const VERSION_START: usize = MAGIC_START + MAGIC_SIZE;
pub const VERSION_SIZE: usize = 2;

pub const COUNT_START: usize = VERSION_START + VERSION_SIZE;
pub const COUNT_SIZE: usize = 8;

pub const HEADER_SIZE: usize = COUNT_START + COUNT_SIZE;

//per entry, fixed part
pub const KIND_SIZE: usize = 1;
pub const RADIUS_SIZE: usize = 1; //0 when the kind takes no radius
pub const NBITS_SIZE: usize = 4;
pub const TANIMOTO_SIZE: usize = 8;

pub const ENTRY_FIXED_SIZE: usize = KIND_SIZE + RADIUS_SIZE + NBITS_SIZE + TANIMOTO_SIZE;

//per entry, variable part: reference id, target id, np id
pub const ID_LENGTH_SIZE: usize = 2;
pub const MAX_ID_LENGTH: usize = u16::MAX as usize;

pub const IDS_PER_ENTRY: usize = 3;

/// Smallest possible encoded entry, all identifiers empty.
pub const MIN_ENTRY_SIZE: usize = ENTRY_FIXED_SIZE + IDS_PER_ENTRY * ID_LENGTH_SIZE;

//store directory
pub const ENTRIES_FILENAME: &str = "entries.bin";
pub const META_FILENAME: &str = "meta.yaml";
pub const LOCK_FILENAME: &str = ".lock";
pub const CONFIG_FILENAME: &str = "config.yaml";
