//! Error kinds surfaced by the pipeline.
//!
//! Per-record problems (bad restriction, out-of-range coordinate) are not
//! errors: stages warn, skip, and report an aggregate count. Everything
//! here aborts the run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("configuration error in {key}: {message}")]
    Config { key: String, message: String },

    #[error("cannot read input {}: {message}", .path.display())]
    Input { path: PathBuf, message: String },

    #[error("artifact checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("preprocessing aborted by termination request")]
    Terminated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PrepareError>;

impl PrepareError {
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        PrepareError::Config {
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn input(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PrepareError::Input {
            path: path.into(),
            message: message.into(),
        }
    }
}
