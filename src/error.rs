//! Centralized error handling for geoetl.
//!
//! Every fallible operation in the library returns [`Result<T>`], whose error
//! type is the [`EtlError`] enum. The interpreter converts any `EtlError`
//! raised by a step into a failed [`Outcome`](crate::pipeline::Outcome)
//! carrying the error's display string, so the messages below are what a
//! headless run reports verbatim.
//!
//! ```
//! use geoetl::error::EtlError;
//!
//! fn describe(err: &EtlError) -> &'static str {
//!     match err {
//!         EtlError::Io(_) => "file system",
//!         EtlError::UnknownStep { .. } => "workflow",
//!         EtlError::NoDataset { .. } => "pipeline shape",
//!         _ => "other",
//!     }
//! }
//! ```
//!
//! The [`ResultExt`] trait adds `.context()` to any result whose error can
//! become an `EtlError`:
//!
//! ```no_run
//! use geoetl::error::ResultExt as _;
//!
//! fn read(path: &str) -> geoetl::error::Result<String> {
//!     std::fs::read_to_string(path).context("Failed to read workflow")
//! }
//! ```

use std::fmt;

/// Main error type for geoetl operations.
#[derive(Debug)]
pub enum EtlError {
    /// I/O errors (file operations, network, etc.)
    Io(std::io::Error),

    /// Dataframe errors raised by polars (parsing, filtering, joining, writing)
    DataProcessing(String),

    /// Database connection or query errors
    Database(String),

    /// Object storage errors
    Storage(String),

    /// Geometry encoding or coordinate transformation errors
    Geometry(String),

    /// Workflow document could not be read or written
    Workflow(String),

    /// Configuration errors
    Config(String),

    /// A step record carries a `type` that is not part of the step vocabulary
    UnknownStep { kind: String },

    /// A step record lacks a field its kind requires
    MissingField { kind: String, field: &'static str },

    /// A step record has a field of the wrong shape
    InvalidField {
        kind: String,
        field: &'static str,
        reason: String,
    },

    /// A transform or sink step ran before any source bound a dataset
    NoDataset { kind: String },

    /// Generic error with context
    Other(String),
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataProcessing(msg) => write!(f, "Data processing error: {msg}"),
            Self::Database(msg) => write!(f, "Database error: {msg}"),
            Self::Storage(msg) => write!(f, "Object storage error: {msg}"),
            Self::Geometry(msg) => write!(f, "Geometry error: {msg}"),
            Self::Workflow(msg) => write!(f, "Workflow error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::UnknownStep { kind } => write!(f, "Unknown step type '{kind}'"),
            Self::MissingField { kind, field } => {
                write!(f, "Step '{kind}' is missing required field '{field}'")
            }
            Self::InvalidField {
                kind,
                field,
                reason,
            } => write!(f, "Step '{kind}' has invalid field '{field}': {reason}"),
            Self::NoDataset { kind } => {
                write!(f, "Step '{kind}' needs a dataset but no source step has run yet")
            }
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EtlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for EtlError {
    fn from(err: anyhow::Error) -> Self {
        // `{:#}` keeps the whole context chain on one line.
        Self::Other(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Workflow(format!("JSON error: {err}"))
    }
}

impl From<polars::error::PolarsError> for EtlError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::DataProcessing(err.to_string())
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<object_store::Error> for EtlError {
    fn from(err: object_store::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<object_store::path::Error> for EtlError {
    fn from(err: object_store::path::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<url::ParseError> for EtlError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("Invalid URL: {err}"))
    }
}

#[cfg(feature = "geo")]
impl From<proj::ProjError> for EtlError {
    fn from(err: proj::ProjError) -> Self {
        Self::Geometry(err.to_string())
    }
}

#[cfg(feature = "geo")]
impl From<proj::ProjCreateError> for EtlError {
    fn from(err: proj::ProjCreateError) -> Self {
        Self::Geometry(err.to_string())
    }
}

#[cfg(feature = "geo")]
impl From<geozero::error::GeozeroError> for EtlError {
    fn from(err: geozero::error::GeozeroError) -> Self {
        Self::Geometry(err.to_string())
    }
}

#[cfg(feature = "geo")]
impl From<parquet::errors::ParquetError> for EtlError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Self::DataProcessing(err.to_string())
    }
}

impl From<EtlError> for String {
    fn from(err: EtlError) -> Self {
        err.to_string()
    }
}

/// Result type alias for geoetl operations.
pub type Result<T> = std::result::Result<T, EtlError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<EtlError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: EtlError = e.into();
            EtlError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: EtlError = e.into();
            EtlError::Other(format!("{}: {}", f(), err))
        })
    }
}
