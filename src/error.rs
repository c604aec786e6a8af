use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cache entry '{0}' disappeared while it was being processed")]
    MissingCacheEntry(String),

    #[error("Entry store failure: {0}")]
    Store(String),

    #[error("Output sink failure: {0}")]
    Output(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Non-fatal problems met while processing records. They are collected into
/// the progress summary of an invocation and never abort it.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunIssue {
    #[error("Invalid reference '{reference}'")]
    InvalidReference { reference: String },

    #[error("Cost record '{record_id}' ({reference}) does not match any case of family {family}")]
    UnmatchedCostRecord {
        record_id: String,
        reference: String,
        family: String,
    },

    #[error("Cost record '{record_id}' falls into bin {offset} of case {case}, outside 0..{bins}")]
    InvalidBinOffset {
        record_id: String,
        case: String,
        offset: i32,
        bins: usize,
    },

    #[error("Family {family} re-appeared after it was finalized; case input is not sorted")]
    UnsortedInputDetected { family: String },
}
