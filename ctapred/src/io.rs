//! Handles reading and writing a CTA dataset store on disk
//!
//! A store is a directory holding the binary entry table, a YAML build history and one CSV
//! export per build. Entries are written in key order, so the same entry set always produces the
//! same bytes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use ascii::{AsciiStr, AsciiString};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cta::{BuildReport, CtaDataset, CtaEntry, Upsert};
use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintKind, FingerprintSpec};
use crate::layout;

/// One build run as recorded in the store's history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BuildRecord {
    pub build: usize,
    pub fingerprint: FingerprintSpec,
    pub tc: f64,
    pub sv: Option<f64>,
    pub workers: usize,
    pub reference_compounds: usize,
    pub np_compounds: usize,
    pub skipped_reference: usize,
    pub skipped_np: usize,
    pub matches: usize,
    pub inserted: usize,
    pub updated: usize,
    pub total_entries: usize,
}

impl BuildRecord {

    pub fn from_report(build: usize, fingerprint: FingerprintSpec, tc: f64, sv: Option<f64>, workers: usize, report: &BuildReport) -> Self {

        return Self {
            build,
            fingerprint,
            tc,
            sv,
            workers,
            reference_compounds: report.reference_compounds,
            np_compounds: report.np_compounds,
            skipped_reference: report.skipped_reference,
            skipped_np: report.skipped_np,
            matches: report.matches,
            inserted: report.merge.inserted,
            updated: report.merge.updated,
            total_entries: report.total_entries,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreMeta {
    pub format_version: u16,
    pub builds: Vec<BuildRecord>,
}

impl Default for StoreMeta {
    fn default() -> Self {
        Self { format_version: layout::FORMAT_VERSION, builds: Vec::new() }
    }
}

impl StoreMeta {

    pub fn next_build_number(&self) -> usize {
        self.builds.iter().map(|b| b.build).max().map_or(1, |b| b + 1)
    }

    /// The most recent build made with `spec`; its number identifies the dataset in outputs.
    pub fn latest_build_for(&self, spec: &FingerprintSpec) -> Option<&BuildRecord> {
        self.builds.iter().filter(|b| &b.fingerprint == spec).max_by_key(|b| b.build)
    }
}

/// Exclusive hold on a store for the duration of one build.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("could not remove lock {}: {}", self.path.display(), e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CtaStore {
    directory: PathBuf,
}

impl CtaStore {

    /// Opens a store for writing, creating its directory if needed.
    pub fn create(directory: impl AsRef<Path>) -> Result<Self> {

        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        return Ok(Self { directory });
    }

    /// Refers to an existing store for reading.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {

        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(Error::DatasetIo(format!("no CTA dataset at {}", directory.display())));
        }

        return Ok(Self { directory });
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn entries_path(&self) -> PathBuf {
        self.directory.join(layout::ENTRIES_FILENAME)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.directory.join(layout::META_FILENAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.directory.join(layout::LOCK_FILENAME)
    }

    pub fn export_path(&self, build: usize) -> PathBuf {
        self.directory.join(format!("CTA_data_{}.csv", build))
    }

    pub fn has_entries(&self) -> bool {
        self.entries_path().is_file()
    }

    /// Takes the store's lock; fails if another build holds it.
    pub fn lock(&self) -> Result<StoreLock> {

        let path = self.lock_path();

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::DatasetIo(format!(
                    "{} is locked by another build (remove {} if that build is gone)",
                    self.directory.display(),
                    path.display()
                )));
            },
            Err(e) => return Err(e.into()),
        };

        writeln!(file, "{}", std::process::id())?;

        return Ok(StoreLock { path });
    }

    /// Loads the dataset. A missing or unreadable entry table is a dataset error.
    pub fn load(&self) -> Result<CtaDataset> {

        let path = self.entries_path();

        let mut bytes: Vec<u8> = Vec::new();
        File::open(&path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| Error::DatasetIo(format!("cannot read {}: {}", path.display(), e)))?;

        let dataset = decode_entries(&bytes)
            .map_err(|e| Error::DatasetIo(format!("{}: {}", path.display(), e)))?;

        info!("loaded {} CTA entries from {}", dataset.len(), path.display());

        return Ok(dataset);
    }

    /// Like [`CtaStore::load`] but a store without entries yet is `None`.
    pub fn load_existing(&self) -> Result<Option<CtaDataset>> {

        match self.has_entries() {
            true => Ok(Some(self.load()?)),
            false => Ok(None),
        }
    }

    pub fn read_meta(&self) -> Result<StoreMeta> {

        let path = self.meta_path();
        if !path.is_file() {
            return Ok(StoreMeta::default());
        }

        let serialized = fs::read_to_string(&path)?;
        let meta: StoreMeta = serde_yaml::from_str(&serialized)
            .map_err(|e| Error::DatasetIo(format!("corrupt {}: {}", path.display(), e)))?;

        return Ok(meta);
    }

    fn write_meta(&self, meta: &StoreMeta) -> Result<()> {

        let serialized = serde_yaml::to_string(meta)?;
        write_atomically(&self.meta_path(), serialized.as_bytes())
    }

    /// Replaces the entry table with `dataset`, appends `record` to the history and writes the
    /// CSV export for the build.
    pub fn save(&self, dataset: &CtaDataset, record: BuildRecord) -> Result<()> {

        let bytes = encode_entries(dataset)?;
        write_atomically(&self.entries_path(), &bytes)?;

        write_csv_export(&self.export_path(record.build), dataset)?;

        let mut meta = self.read_meta()?;
        meta.builds.push(record);
        self.write_meta(&meta)?;

        info!("wrote {} CTA entries to {}", dataset.len(), self.directory.display());

        return Ok(());
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;

    Ok(())
}

fn write_id(buf: &mut Vec<u8>, id: &str) -> Result<()> {

    let ascii = AsciiStr::from_ascii(id.as_bytes())
        .map_err(|_| Error::DatasetIo(format!("identifier {:?} is not ASCII", id)))?;

    if ascii.len() > layout::MAX_ID_LENGTH {
        return Err(Error::DatasetIo(format!("identifier longer than {} bytes", layout::MAX_ID_LENGTH)));
    }

    buf.write_u16::<BigEndian>(ascii.len() as u16)?;
    buf.extend_from_slice(ascii.as_bytes());

    Ok(())
}

fn read_id(cursor: &mut Cursor<&[u8]>) -> std::result::Result<String, String> {

    let len = cursor.read_u16::<BigEndian>().map_err(|_| "truncated identifier length".to_string())? as usize;

    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).map_err(|_| "truncated identifier".to_string())?;

    let ascii = AsciiString::from_ascii(bytes).map_err(|_| "non-ASCII identifier".to_string())?;

    return Ok(String::from(ascii));
}

pub fn encode_entries(dataset: &CtaDataset) -> Result<Vec<u8>> {

    let mut buf: Vec<u8> = Vec::with_capacity(layout::HEADER_SIZE + dataset.len() * (layout::MIN_ENTRY_SIZE + 32));

    buf.extend_from_slice(&layout::MAGIC);
    buf.write_u16::<BigEndian>(layout::FORMAT_VERSION)?;
    buf.write_u64::<BigEndian>(dataset.len() as u64)?;

    for entry in dataset.iter() {
        let spec = entry.fingerprint_spec;
        buf.write_u8(spec.kind.code())?;
        let radius = u8::try_from(spec.radius.unwrap_or(0))
            .map_err(|_| Error::DatasetIo(format!("radius of {} does not fit the entry table", spec)))?;
        let n_bits = u32::try_from(spec.n_bits)
            .map_err(|_| Error::DatasetIo(format!("nBits of {} does not fit the entry table", spec)))?;
        buf.write_u8(radius)?;
        buf.write_u32::<BigEndian>(n_bits)?;
        buf.write_f64::<BigEndian>(entry.tanimoto)?;

        write_id(&mut buf, &entry.reference_compound_id)?;
        write_id(&mut buf, &entry.target_id)?;
        write_id(&mut buf, &entry.np_compound_id)?;
    }

    return Ok(buf);
}

pub fn decode_entries(bytes: &[u8]) -> std::result::Result<CtaDataset, String> {

    if bytes.len() < layout::HEADER_SIZE {
        return Err("file shorter than header".to_string());
    }
    if bytes[layout::MAGIC_START..layout::MAGIC_START + layout::MAGIC_SIZE] != layout::MAGIC {
        return Err("not a CTA entry table".to_string());
    }

    let mut cursor = Cursor::new(bytes);
    cursor.set_position(layout::VERSION_START as u64);

    let version = cursor.read_u16::<BigEndian>().map_err(|e| e.to_string())?;
    if version != layout::FORMAT_VERSION {
        return Err(format!("unsupported format version {}", version));
    }

    let count = cursor.read_u64::<BigEndian>().map_err(|e| e.to_string())? as usize;
    let remaining = bytes.len() - layout::HEADER_SIZE;
    if count.saturating_mul(layout::MIN_ENTRY_SIZE) > remaining {
        return Err(format!("header claims {} entries but only {} bytes follow", count, remaining));
    }

    let mut dataset = CtaDataset::new();

    for i in 0..count {
        let truncated = |_: io::Error| format!("entry {} truncated", i);

        let code = cursor.read_u8().map_err(truncated)?;
        let radius = cursor.read_u8().map_err(truncated)?;
        let n_bits = cursor.read_u32::<BigEndian>().map_err(truncated)? as usize;
        let tanimoto = cursor.read_f64::<BigEndian>().map_err(truncated)?;

        let kind = FingerprintKind::from_code(code).ok_or_else(|| format!("entry {}: unknown fingerprint code {}", i, code))?;
        let radius = match radius {
            0 => None,
            r => Some(r as u32),
        };
        let fingerprint_spec = FingerprintSpec::new(kind, n_bits, radius).map_err(|e| format!("entry {}: {}", i, e))?;

        if !(0.0..=1.0).contains(&tanimoto) {
            return Err(format!("entry {}: similarity {} out of range", i, tanimoto));
        }

        let reference_compound_id = read_id(&mut cursor).map_err(|e| format!("entry {}: {}", i, e))?;
        let target_id = read_id(&mut cursor).map_err(|e| format!("entry {}: {}", i, e))?;
        let np_compound_id = read_id(&mut cursor).map_err(|e| format!("entry {}: {}", i, e))?;

        let entry = CtaEntry {
            reference_compound_id,
            target_id,
            np_compound_id,
            tanimoto,
            fingerprint_spec,
        };

        match dataset.upsert(entry) {
            Upsert::Inserted => {},
            _ => return Err(format!("entry {}: duplicate key", i)),
        }
    }

    if cursor.position() as usize != bytes.len() {
        return Err("trailing bytes after last entry".to_string());
    }

    return Ok(dataset);
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    reference_compound_id: &'a str,
    target_id: &'a str,
    np_compound_id: &'a str,
    tanimoto: f64,
    fingerprint: String,
}

/// CSV copy of the dataset for inspection outside this tool.
pub fn write_csv_export(path: &Path, dataset: &CtaDataset) -> Result<()> {

    let mut writer = csv::Writer::from_path(path)?;

    for entry in dataset.iter() {
        writer.serialize(ExportRow {
            reference_compound_id: &entry.reference_compound_id,
            target_id: &entry.target_id,
            np_compound_id: &entry.np_compound_id,
            tanimoto: entry.tanimoto,
            fingerprint: entry.fingerprint_spec.label(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::cta::MergeStats;

    fn sample() -> CtaDataset {

        let ecfp = FingerprintSpec::new(FingerprintKind::Ecfp, 2048, Some(2)).unwrap();

        CtaDataset::from_entries(vec![
            CtaEntry {
                reference_compound_id: "CHEMBL25".to_string(),
                target_id: "CHEMBL204".to_string(),
                np_compound_id: "CNP0000001".to_string(),
                tanimoto: 0.8125,
                fingerprint_spec: ecfp,
            },
            CtaEntry {
                reference_compound_id: "CHEMBL25".to_string(),
                target_id: "CHEMBL205".to_string(),
                np_compound_id: "CNP0000001".to_string(),
                tanimoto: 0.8125,
                fingerprint_spec: ecfp,
            },
            CtaEntry {
                reference_compound_id: "CHEMBL3".to_string(),
                target_id: "CHEMBL204".to_string(),
                np_compound_id: "CNP0000002".to_string(),
                tanimoto: 1.0,
                fingerprint_spec: FingerprintSpec::maccs(),
            },
        ])
    }

    fn report(total: usize) -> BuildReport {
        BuildReport {
            reference_compounds: 2,
            np_compounds: 2,
            matches: 2,
            new_entries: total,
            merge: MergeStats { inserted: total, ..MergeStats::default() },
            total_entries: total,
            ..BuildReport::default()
        }
    }

    #[test]
    fn entries_survive_encoding() {

        let dataset = sample();
        let bytes = encode_entries(&dataset).unwrap();
        assert_eq!(decode_entries(&bytes).unwrap(), dataset);

        // same entries, different insertion order, same bytes
        let reversed = CtaDataset::from_entries(dataset.entries().into_iter().rev());
        assert_eq!(encode_entries(&reversed).unwrap(), bytes);
    }

    #[test]
    fn corrupt_tables_are_rejected() {

        let bytes = encode_entries(&sample()).unwrap();

        assert!(decode_entries(&bytes[..bytes.len() - 3]).is_err());
        assert!(decode_entries(&bytes[..5]).is_err());

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(decode_entries(&bad_magic).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(decode_entries(&trailing).is_err());

        let mut huge_count = bytes.clone();
        huge_count[layout::COUNT_START..layout::COUNT_START + layout::COUNT_SIZE].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(decode_entries(&huge_count).is_err());
    }

    #[test]
    fn non_ascii_identifiers_are_refused() {

        let dataset = CtaDataset::from_entries(vec![CtaEntry {
            reference_compound_id: "réf".to_string(),
            target_id: "T".to_string(),
            np_compound_id: "NP".to_string(),
            tanimoto: 0.5,
            fingerprint_spec: FingerprintSpec::maccs(),
        }]);

        assert!(matches!(encode_entries(&dataset), Err(Error::DatasetIo(_))));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_n_bits_are_refused() {

        let wide = FingerprintSpec { kind: FingerprintKind::Avalon, n_bits: u32::MAX as usize + 1, radius: None };
        let dataset = CtaDataset::from_entries(vec![CtaEntry {
            reference_compound_id: "R".to_string(),
            target_id: "T".to_string(),
            np_compound_id: "NP".to_string(),
            tanimoto: 0.5,
            fingerprint_spec: wide,
        }]);

        assert!(matches!(encode_entries(&dataset), Err(Error::DatasetIo(_))));
    }

    #[test]
    fn store_save_and_load() {

        let dir = tempfile::tempdir().unwrap();
        let store = CtaStore::create(dir.path().join("cta")).unwrap();

        assert!(store.load_existing().unwrap().is_none());
        assert!(matches!(store.load(), Err(Error::DatasetIo(_))));

        let dataset = sample();
        let meta = store.read_meta().unwrap();
        let build = meta.next_build_number();
        assert_eq!(build, 1);

        let spec = FingerprintSpec::new(FingerprintKind::Ecfp, 2048, Some(2)).unwrap();
        store.save(&dataset, BuildRecord::from_report(build, spec, 0.8, Some(10000.0), 4, &report(3))).unwrap();

        assert_eq!(store.load().unwrap(), dataset);
        assert!(store.export_path(1).is_file());

        let meta = store.read_meta().unwrap();
        assert_eq!(meta.builds.len(), 1);
        assert_eq!(meta.next_build_number(), 2);
        assert_eq!(meta.latest_build_for(&spec).map(|b| b.build), Some(1));
        assert!(meta.latest_build_for(&FingerprintSpec::maccs()).is_none());
    }

    #[test]
    fn corrupt_store_is_a_dataset_error() {

        let dir = tempfile::tempdir().unwrap();
        let store = CtaStore::create(dir.path()).unwrap();
        fs::write(store.entries_path(), b"CTADgarbage").unwrap();

        assert!(matches!(store.load(), Err(Error::DatasetIo(_))));
        assert!(matches!(CtaStore::open(dir.path().join("missing")), Err(Error::DatasetIo(_))));
    }

    #[test]
    fn lock_is_exclusive() {

        let dir = tempfile::tempdir().unwrap();
        let store = CtaStore::create(dir.path()).unwrap();

        let lock = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(Error::DatasetIo(_))));

        drop(lock);
        assert!(store.lock().is_ok());
    }
}
