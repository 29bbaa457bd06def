//! Error taxonomy shared by the matcher, the CTA builder and the ranking engine.
//!
//! Parameter and dataset errors abort a run. Structure errors are recovered per compound by the
//! caller: the compound is skipped and counted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("structure error for compound {compound_id}: {reason}")]
    Structure {
        compound_id: String,
        reason: String,
    },

    #[error("incompatible fingerprints: {left} vs {right}")]
    IncompatibleFingerprint {
        left: String,
        right: String,
    },

    #[error("dataset error: {0}")]
    DatasetIo(String),

    #[error("worker failed: {0}")]
    WorkerFailure(String),

    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {

    pub fn structure(compound_id: &str, reason: impl Into<String>) -> Self {
        Error::Structure {
            compound_id: compound_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that only cost the current compound.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Structure { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
