//! Fingerprint specs, fingerprint vectors and the Tanimoto coefficient.
//!
//! Vectors are produced upstream by a chemistry toolkit. Here they are opaque fixed-length bit
//! or count vectors that carry the spec they were generated under, so two vectors can only be
//! compared when their specs are identical.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MACCS keys have a fixed length, whatever nBits was asked for.
pub const MACCS_LENGTH: usize = 167;

pub const VALID_RADII: [u32; 2] = [2, 3];

const WORD_BITS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintKind {
    Avalon,
    Ecfp,
    Fcfp,
    Maccs,
}

impl FingerprintKind {

    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintKind::Avalon => "avalon",
            FingerprintKind::Ecfp => "ecfp",
            FingerprintKind::Fcfp => "fcfp",
            FingerprintKind::Maccs => "maccs",
        }
    }

    /// Morgan-type fingerprints are the only ones parameterised by a radius.
    pub fn uses_radius(&self) -> bool {
        matches!(self, FingerprintKind::Ecfp | FingerprintKind::Fcfp)
    }

    /// One-byte tag used by the on-disk entry table.
    pub fn code(&self) -> u8 {
        match self {
            FingerprintKind::Avalon => 1,
            FingerprintKind::Ecfp => 2,
            FingerprintKind::Fcfp => 3,
            FingerprintKind::Maccs => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FingerprintKind::Avalon),
            2 => Some(FingerprintKind::Ecfp),
            3 => Some(FingerprintKind::Fcfp),
            4 => Some(FingerprintKind::Maccs),
            _ => None,
        }
    }
}

impl FromStr for FingerprintKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avalon" => Ok(FingerprintKind::Avalon),
            "ecfp" => Ok(FingerprintKind::Ecfp),
            "fcfp" => Ok(FingerprintKind::Fcfp),
            "maccs" => Ok(FingerprintKind::Maccs),
            other => Err(Error::Parameter(format!(
                "unknown fingerprint '{}', expected one of avalon, ecfp, fcfp, maccs",
                other
            ))),
        }
    }
}

impl fmt::Display for FingerprintKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything that determines the shape and meaning of a fingerprint vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FingerprintSpec {
    pub kind: FingerprintKind,
    pub n_bits: usize,
    pub radius: Option<u32>,
}

impl FingerprintSpec {

    /// Validates a kind / nBits / radius combination.
    ///
    /// nBits is ignored for MACCS and normalised to [`MACCS_LENGTH`]. A radius is required for
    /// ECFP/FCFP and rejected for Avalon/MACCS.
    pub fn new(kind: FingerprintKind, n_bits: usize, radius: Option<u32>) -> Result<Self> {

        let n_bits = match kind {
            FingerprintKind::Maccs => MACCS_LENGTH,
            _ => n_bits,
        };

        if n_bits == 0 {
            return Err(Error::Parameter("nBits must be a positive integer".to_string()));
        }

        match (kind.uses_radius(), radius) {
            (true, Some(r)) if VALID_RADII.contains(&r) => {},
            (true, Some(r)) => {
                return Err(Error::Parameter(format!("radius must be 2 or 3, got {}", r)));
            },
            (true, None) => {
                return Err(Error::Parameter(format!("{} requires a radius (2 or 3)", kind)));
            },
            (false, Some(_)) => {
                return Err(Error::Parameter(format!("radius is not applicable to {}", kind)));
            },
            (false, None) => {},
        }

        return Ok(Self { kind, n_bits, radius });
    }

    pub fn maccs() -> Self {
        Self { kind: FingerprintKind::Maccs, n_bits: MACCS_LENGTH, radius: None }
    }

    /// Short label used in file names and CSV exports, e.g. `ecfp_r2_2048`.
    pub fn label(&self) -> String {
        match self.radius {
            Some(r) => format!("{}_r{}_{}", self.kind, r, self.n_bits),
            None => format!("{}_{}", self.kind, self.n_bits),
        }
    }
}

impl fmt::Display for FingerprintSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FingerprintData {
    /// Packed bits, least significant bit of word 0 is bit 0.
    Bits(Vec<u64>),
    /// Dense per-feature counts.
    Counts(Vec<u32>),
}

impl FingerprintData {

    fn representation(&self) -> &'static str {
        match self {
            FingerprintData::Bits(_) => "bits",
            FingerprintData::Counts(_) => "counts",
        }
    }
}

/// A fingerprint vector for one compound under one spec. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    spec: FingerprintSpec,
    data: FingerprintData,
}

impl Fingerprint {

    pub fn from_bits(spec: FingerprintSpec, on_bits: &[usize]) -> std::result::Result<Self, String> {

        let mut words = vec![0u64; num_words(spec.n_bits)];

        for &bit in on_bits {
            if bit >= spec.n_bits {
                return Err(format!("bit {} out of range for {} bits", bit, spec.n_bits));
            }
            words[bit / WORD_BITS] |= 1u64 << (bit % WORD_BITS);
        }

        return Ok(Self { spec, data: FingerprintData::Bits(words) });
    }

    pub fn from_counts(spec: FingerprintSpec, counts: Vec<u32>) -> std::result::Result<Self, String> {

        if counts.len() != spec.n_bits {
            return Err(format!("expected {} counts, found {}", spec.n_bits, counts.len()));
        }

        return Ok(Self { spec, data: FingerprintData::Counts(counts) });
    }

    /// Parses the textual form carried by library files.
    ///
    /// Either a `0`/`1` bit string with one character per bit, or a sparse count vector of
    /// whitespace separated `index:count` pairs.
    pub fn parse(spec: FingerprintSpec, text: &str) -> std::result::Result<Self, String> {

        let text = text.trim();
        if text.is_empty() {
            return Err("missing fingerprint".to_string());
        }

        if text.contains(':') {
            let mut counts = vec![0u32; spec.n_bits];
            for item in text.split_whitespace() {
                let (idx, count) = item
                    .split_once(':')
                    .ok_or_else(|| format!("malformed count entry '{}'", item))?;
                let idx = idx.parse::<usize>().map_err(|_| format!("bad feature index '{}'", idx))?;
                let count = count.parse::<u32>().map_err(|_| format!("bad feature count '{}'", count))?;
                if idx >= spec.n_bits {
                    return Err(format!("feature {} out of range for {} bits", idx, spec.n_bits));
                }
                counts[idx] = counts[idx]
                    .checked_add(count)
                    .ok_or_else(|| format!("feature {} count overflows", idx))?;
            }
            return Self::from_counts(spec, counts);
        }

        if text.len() != spec.n_bits {
            return Err(format!("bit string has length {}, expected {}", text.len(), spec.n_bits));
        }

        let mut on_bits: Vec<usize> = Vec::new();
        for (i, c) in text.chars().enumerate() {
            match c {
                '0' => {},
                '1' => on_bits.push(i),
                _ => return Err(format!("invalid character '{}' in bit string", c)),
            }
        }

        return Self::from_bits(spec, &on_bits);
    }

    /// Inverse of [`Fingerprint::parse`].
    pub fn encode(&self) -> String {
        match &self.data {
            FingerprintData::Bits(words) => (0..self.spec.n_bits)
                .map(|i| match (words[i / WORD_BITS] >> (i % WORD_BITS)) & 1 {
                    1 => '1',
                    _ => '0',
                })
                .collect(),
            FingerprintData::Counts(counts) => counts
                .iter()
                .enumerate()
                .filter(|(_, c)| **c > 0)
                .map(|(i, c)| format!("{}:{}", i, c))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Random bit fingerprint with roughly `density` of the bits set.
    pub fn random<R: Rng>(spec: FingerprintSpec, density: f64, rng: &mut R) -> Self {

        let on_bits: Vec<usize> = (0..spec.n_bits).filter(|_| rng.gen_bool(density)).collect();

        let mut words = vec![0u64; num_words(spec.n_bits)];
        for bit in on_bits {
            words[bit / WORD_BITS] |= 1u64 << (bit % WORD_BITS);
        }

        return Self { spec, data: FingerprintData::Bits(words) };
    }

    pub fn spec(&self) -> &FingerprintSpec {
        &self.spec
    }

    pub fn data(&self) -> &FingerprintData {
        &self.data
    }

    /// Total weight: set bits, or the sum of counts.
    pub fn weight(&self) -> u64 {
        match &self.data {
            FingerprintData::Bits(words) => words.iter().map(|w| w.count_ones() as u64).sum(),
            FingerprintData::Counts(counts) => counts.iter().map(|c| *c as u64).sum(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.weight() == 0
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.spec, self.data.representation())
    }

    pub fn similarity(&self, other: &Fingerprint) -> Result<f64> {
        similarity(self, other)
    }
}

fn num_words(n_bits: usize) -> usize {
    (n_bits + WORD_BITS - 1) / WORD_BITS
}

/// Tanimoto coefficient: intersection weight over union weight.
///
/// Both vectors must come from the same spec and representation, otherwise this fails with
/// `IncompatibleFingerprint`. Two all-zero vectors score 0.
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> Result<f64> {

    let (intersection, union) = match (&a.data, &b.data) {
        (FingerprintData::Bits(x), FingerprintData::Bits(y)) if a.spec == b.spec => {
            x.iter().zip(y.iter()).fold((0u64, 0u64), |(i, u), (p, q)| {
                (i + (p & q).count_ones() as u64, u + (p | q).count_ones() as u64)
            })
        },
        (FingerprintData::Counts(x), FingerprintData::Counts(y)) if a.spec == b.spec => {
            x.iter().zip(y.iter()).fold((0u64, 0u64), |(i, u), (p, q)| {
                (i + (*p).min(*q) as u64, u + (*p).max(*q) as u64)
            })
        },
        _ => {
            return Err(Error::IncompatibleFingerprint {
                left: a.describe(),
                right: b.describe(),
            });
        },
    };

    if union == 0 {
        return Ok(0.0);
    }

    return Ok(intersection as f64 / union as f64);
}
