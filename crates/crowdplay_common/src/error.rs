//! Error types for crowdplay.

use std::path::PathBuf;
use thiserror::Error;

/// Startup configuration failures. A bad file never degrades to defaults.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Why a vote was not counted. Returned to the caller, never escalated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteRejected {
    #[error("window is not collecting votes")]
    NotCollecting,

    #[error("unrecognized command")]
    InvalidCommand,

    #[error("release is not votable")]
    ReleaseNotVotable,

    #[error("'{0}' is not a votable action")]
    NotVotable(String),
}

/// Weight resolver failure. Callers fall back to the base weight.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeightError {
    #[error("weight source unavailable: {0}")]
    Unavailable(String),

    #[error("weight {0} is not a finite number")]
    NotFinite(f64),
}

/// Listener failure on window close. Logged by the engine, never retried.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("sink rejected command: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VoteRejected {
    /// Short machine-friendly label for logs and status output
    pub fn code(&self) -> &'static str {
        match self {
            VoteRejected::NotCollecting => "not_collecting",
            VoteRejected::InvalidCommand => "invalid",
            VoteRejected::ReleaseNotVotable => "release",
            VoteRejected::NotVotable(_) => "not_votable",
        }
    }
}
