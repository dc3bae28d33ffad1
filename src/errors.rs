// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreewatchError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("path too long: {len} bytes (max {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("backend not found: {0}")]
    UnknownBackend(String),

    #[error("backend {0} is not supported on this platform")]
    BackendUnsupported(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("invalid exclude pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to start monitor: {0}")]
    Setup(String),

    #[error("failed to stop monitor cleanly: {0}")]
    Teardown(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TreewatchError>;
