//! Error types for sc-features
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Every variant maps onto one of three failure classes via [`Error::kind`]:
//! configuration (bad or missing names), validation (joins that produce empty
//! or duplicate-keyed results) and I/O (unreadable inputs, unwritable outputs,
//! malformed files).

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Failure class of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing compartment, column, method or operation name
    Configuration,
    /// A join produced an empty or duplicate-keyed result
    Validation,
    /// File not found, not writable, or malformed input
    Io,
}

/// sc-features error types
#[derive(Error, Debug)]
pub enum Error {
    /// Pipeline configuration refers to something that does not exist
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Data does not satisfy a join or shape invariant
    #[error("Validation error: {0}")]
    Validation(String),

    /// Measurement store could not be read
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error (CSV parsing, casting, column kernels)
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Malformed TOML configuration file
    #[error("Config file error: {0}")]
    Config(#[from] toml::de::Error),

    /// Manifest serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify this error into the pipeline's failure taxonomy
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(_)
            | Self::Io(_)
            | Self::Arrow(_)
            | Self::Parquet(_)
            | Self::Sqlite(_)
            | Self::Config(_)
            | Self::Json(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
