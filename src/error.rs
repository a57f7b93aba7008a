// src/error.rs
use std::io;
use thiserror::Error;

/// Result type used throughout the bridge
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Error type for the export pipeline
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Sample error: {0}")]
    Sample(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl BridgeError {
    /// Error for a poisoned lock guarding `what`
    pub fn poisoned(what: &str) -> Self {
        BridgeError::Other(format!("Lock poisoned: {}", what))
    }
}
