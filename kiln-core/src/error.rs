//! Error types for KILN operations

use crate::{CacheKey, RouteId};
use std::time::Duration;
use thiserror::Error;

/// A request carried an identifier the codec could not decode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed identifier {raw:?}: {reason}")]
pub struct KeyDecodeError {
    pub raw: String,
    pub reason: String,
}

impl KeyDecodeError {
    pub fn new(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by the external data source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("Record {id} not found for route {route}")]
    NotFound { route: RouteId, id: String },

    #[error("Data source unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Listing the known identifiers of a route failed.
///
/// Fatal to the build pass of that one route; other routes are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Enumeration failed for route {route}: {reason}")]
pub struct EnumerationError {
    pub route: RouteId,
    pub reason: String,
}

/// A single build attempt failed.
///
/// Cloned to every waiter of the build job, so it must stay cheap and
/// self-contained.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Data unavailable: {reason}")]
    DataUnavailable { reason: String },

    #[error("Build timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Render failed: {reason}")]
    Render { reason: String },

    #[error("No upstream record for {key}")]
    NotFound { key: CacheKey },

    #[error("Artifact store rejected the write: {reason}")]
    Store { reason: String },

    #[error("Build for {key} ended without reporting a result")]
    Aborted { key: CacheKey },
}

impl BuildError {
    /// Short machine-friendly label, used in logs and retained artifacts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Render { .. } => "render",
            Self::NotFound { .. } => "not_found",
            Self::Store { .. } => "store",
            Self::Aborted { .. } => "aborted",
        }
    }

    /// Map a data source failure observed while building `key`.
    pub fn from_data(err: DataError, key: &CacheKey) -> Self {
        match err {
            DataError::NotFound { .. } => Self::NotFound { key: key.clone() },
            DataError::Unavailable { reason } => Self::DataUnavailable { reason },
        }
    }
}

/// Artifact store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open store at {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("I/O failed at {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Route {route} is declared more than once")]
    DuplicateRoute { route: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all KILN errors.
#[derive(Debug, Clone, Error)]
pub enum KilnError {
    #[error("Key decode error: {0}")]
    KeyDecode(#[from] KeyDecodeError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Enumeration error: {0}")]
    Enumeration(#[from] EnumerationError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for KILN operations.
pub type KilnResult<T> = Result<T, KilnError>;

// =============================================================================
// TESTS
// =============================================================================
