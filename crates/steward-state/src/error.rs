//! Error types for the Steward state crate.

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur in the key store and checkpoint store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("snapshot ids exhausted for key {0}")]
    SnapshotExhausted(String),
}

/// A submitted configuration that cannot be accepted.
///
/// Raised before any state is mutated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("min_replicas ({min}) must not exceed max_replicas ({max})")]
    ReplicaBounds { min: u32, max: u32 },

    #[error("{field} must be {requirement}, got {value}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
        value: f64,
    },

    #[error("{0} must not be negative")]
    Negative(&'static str),

    #[error("unknown {field} value {value}")]
    UnknownEnumValue { field: &'static str, value: i32 },

    #[error("{0}")]
    Invalid(String),
}
