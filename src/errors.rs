// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DroidError {
    /// Preparing a job failed; fatal to that job only.
    #[error("Setup error: {0}")]
    SetupError(String),

    /// The worker socket or the bridge tasks failed.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A worker message could not be interpreted.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The worker or auxiliary process failed to start or died unexpectedly.
    #[error("Process error: {0}")]
    ProcessError(String),

    /// A coordinator call failed or returned a non-zero status code.
    #[error("Request to coordinator failed: {0}")]
    RequestFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DroidError {
    /// Errors that must escalate to full worker-group termination.
    pub fn is_fatal_to_group(&self) -> bool {
        matches!(
            self,
            DroidError::TransportError(_) | DroidError::ProcessError(_) | DroidError::ParseError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DroidError>;
