//! Error types for the change-detection engine

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Persisted state exists but cannot be parsed. The raw content is kept so
    /// the operator can inspect what the file actually held.
    #[error("corrupt state in {path}: state data: '{raw}'; cause: {source}")]
    CorruptState {
        path: PathBuf,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("collection failed in {probe}: {message}")]
    Collection { probe: String, message: String },

    #[error("whitelist entry {path} cannot be resolved: {source}")]
    WhitelistResolution {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn collection(probe: &str, err: anyhow::Error) -> Self {
        EngineError::Collection {
            probe: probe.to_string(),
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
