//! Run parameters, as read from YAML or the command line.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintKind, FingerprintSpec};
use crate::matcher::validate_tc;
use crate::pool::resolve_worker_count;
use crate::ranking::validate_k;

pub const DEFAULT_N_BITS: usize = 2048;
pub const DEFAULT_RADIUS: u32 = 2;
pub const DEFAULT_BUILD_TC: f64 = 0.80;
pub const DEFAULT_PREDICT_TC: f64 = 0.1;
/// Bioactivity cutoff in nM applied when the reference library was curated.
pub const MAX_SV: f64 = 10000.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub fingerprint: FingerprintKind,
    pub n_bits: usize,
    pub radius: Option<u32>,
    pub tc: f64,
    pub k: Vec<usize>,
    pub workers: i64,
    pub sv: f64,
    pub verbose: bool,
}

/// A validated [`RunConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub spec: FingerprintSpec,
    pub tc: f64,
    pub k: Vec<usize>,
    pub workers: usize,
    pub sv: f64,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        return Self {
            fingerprint: FingerprintKind::Ecfp,
            n_bits: DEFAULT_N_BITS,
            radius: None,
            tc: DEFAULT_BUILD_TC,
            k: vec![1],
            workers: -1,
            sv: MAX_SV,
            verbose: false,
        }
    }
}

impl RunConfig {

    /// Defaults for prediction runs, which rank over nearly all nonzero evidence.
    pub fn predict_default() -> Self {
        Self { tc: DEFAULT_PREDICT_TC, ..Self::default() }
    }

    pub fn from_file(filename: &Path) -> Result<Self> {

        let serialized = std::fs::read_to_string(filename)?;
        let deserialized: Self = serde_yaml::from_str(&serialized)?;

        return Ok(deserialized);
    }

    pub fn to_file(&self, filename: &Path) -> Result<()> {

        let serialized = serde_yaml::to_string(&self)?;
        let mut file = File::create(filename)?;

        file.write_all(serialized.as_bytes())?;
        Ok(())
    }

    /// Checks every parameter before any similarity work starts.
    ///
    /// ECFP/FCFP without a radius get the default radius of 2.
    pub fn validate(&self) -> Result<Params> {

        let radius = match (self.fingerprint.uses_radius(), self.radius) {
            (true, None) => Some(DEFAULT_RADIUS),
            (_, r) => r,
        };
        let spec = FingerprintSpec::new(self.fingerprint, self.n_bits, radius)?;

        let tc = validate_tc(self.tc)?;

        if self.k.is_empty() {
            return Err(Error::Parameter("at least one k value is required".to_string()));
        }
        let mut k = self.k.iter().map(|k| validate_k(*k)).collect::<Result<Vec<usize>>>()?;
        k.sort_unstable();
        k.dedup();

        let workers = resolve_worker_count(self.workers)?;

        if !(self.sv > 0.0 && self.sv <= MAX_SV) {
            return Err(Error::Parameter(format!("sv must be within (0, {}], got {}", MAX_SV, self.sv)));
        }

        return Ok(Params {
            spec,
            tc,
            k,
            workers,
            sv: self.sv,
            verbose: self.verbose,
        });
    }
}
