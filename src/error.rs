//! Error types for Nearline.
//!
//! Nearline uses a hierarchical error system:
//! - `NearlineError` is the top-level error returned by all public APIs
//! - Specific error types (`ValidationError`, `StorageError`, `NotFoundError`)
//!   provide detail
//!
//! The service layer in front of the engine maps errors onto transport
//! status codes through [`NearlineError::kind`] rather than matching on
//! message strings.
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use nearline::{Config, Engine, Result};
//!
//! fn example() -> Result<()> {
//!     let engine = Engine::open(Config::default())?;
//!     // ... operations that may fail ...
//!     engine.close()?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::types::Generation;

/// Result type alias for Nearline operations.
pub type Result<T> = std::result::Result<T, NearlineError>;

/// Top-level error enum for all Nearline operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching or the `is_*` predicates to handle specific cases.
#[derive(Debug, Error)]
pub enum NearlineError {
    /// Input validation error (dimension mismatch, bad embedding values).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A live record with this id already exists.
    #[error("Duplicate record id: {id}")]
    DuplicateId {
        /// The rejected id.
        id: String,
    },

    /// Requested entity not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// Query rejected before dispatch (bad k, malformed filter, zero vector).
    #[error("Invalid query: {reason}")]
    InvalidQuery {
        /// Why the query was rejected.
        reason: String,
    },

    /// An index rebuild could not complete.
    #[error("Index build failed: {reason}")]
    BuildFailure {
        /// Description of the failure.
        reason: String,
    },

    /// A query exceeded its time budget and was abandoned.
    #[error("Query timed out after {budget:?}")]
    Timeout {
        /// The budget that was exceeded.
        budget: Duration,
    },

    /// Artifact storage error (I/O framing, corruption, locking).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// A structure older than the active generation was offered for publish.
    #[error("Stale generation {offered}: active generation is {active}")]
    StaleGeneration {
        /// Generation carried by the rejected structure.
        offered: Generation,
        /// Generation active at the time of the publish attempt.
        active: Generation,
    },

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant failure (poisoned lock, stopped worker).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NearlineError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates an invalid query error with the given reason.
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Creates a build failure with the given reason.
    pub fn build_failure(reason: impl Into<String>) -> Self {
        Self::BuildFailure {
            reason: reason.into(),
        }
    }

    /// Creates a duplicate id error.
    pub fn duplicate_id(id: impl ToString) -> Self {
        Self::DuplicateId { id: id.to_string() }
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a timeout error for the given budget.
    pub fn timeout(budget: Duration) -> Self {
        Self::Timeout { budget }
    }

    /// Returns the transport-independent kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(ValidationError::DimensionMismatch { .. }) => {
                ErrorKind::DimensionMismatch
            }
            Self::Validation(_) => ErrorKind::InvalidInput,
            Self::DuplicateId { .. } => ErrorKind::DuplicateId,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidQuery { .. } => ErrorKind::InvalidQuery,
            Self::BuildFailure { .. } => ErrorKind::BuildFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Storage(StorageError::Locked(_)) => ErrorKind::Unavailable,
            Self::Storage(_) => ErrorKind::Corrupt,
            Self::Config { .. } => ErrorKind::InvalidInput,
            Self::StaleGeneration { .. } => ErrorKind::Conflict,
            Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if this is an embedding dimension mismatch.
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(
            self,
            Self::Validation(ValidationError::DimensionMismatch { .. })
        )
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a duplicate id error.
    pub fn is_duplicate_id(&self) -> bool {
        matches!(self, Self::DuplicateId { .. })
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if the query was rejected before dispatch.
    pub fn is_invalid_query(&self) -> bool {
        matches!(self, Self::InvalidQuery { .. })
    }

    /// Returns true if this is a build failure.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, Self::BuildFailure { .. })
    }

    /// Returns true if the query timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if a persisted artifact failed validation.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Storage(
                StorageError::Corrupted(_)
                    | StorageError::FormatVersionMismatch { .. }
                    | StorageError::Serialization(_)
            )
        )
    }
}

/// Stable error discriminant for the service layer.
///
/// Transport adapters translate these into their own status codes;
/// [`ErrorKind::http_status`] is the reference mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Embedding length differs from the configured dimension.
    DimensionMismatch,
    /// Other malformed input (non-finite values, bad fields, bad config).
    InvalidInput,
    /// Insert of an id that is already live.
    DuplicateId,
    /// Unknown or tombstoned id.
    NotFound,
    /// Query rejected before dispatch.
    InvalidQuery,
    /// Rebuild failed.
    BuildFailure,
    /// Query exceeded its budget.
    Timeout,
    /// Persisted artifact failed validation.
    Corrupt,
    /// Generation ordering conflict.
    Conflict,
    /// Resource temporarily held elsewhere (artifact lock).
    Unavailable,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Reference HTTP status code for this kind.
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::DimensionMismatch | Self::InvalidQuery => 422,
            Self::InvalidInput => 400,
            Self::DuplicateId | Self::Conflict => 409,
            Self::NotFound => 404,
            Self::Timeout => 504,
            Self::Unavailable => 503,
            Self::BuildFailure | Self::Corrupt | Self::Internal => 500,
        }
    }
}

/// Artifact storage errors.
///
/// These indicate problems reading or writing the persisted index file.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Artifact contents failed validation.
    #[error("Artifact corrupted: {0}")]
    Corrupted(String),

    /// Artifact was written by an incompatible format version.
    #[error("Artifact format version mismatch: expected {expected}, found {found}")]
    FormatVersionMismatch {
        /// Version this build understands.
        expected: u32,
        /// Version found in the file header.
        found: u32,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another writer holds the artifact lock.
    #[error("Artifact is locked by another writer: {0}")]
    Locked(String),
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

// Convert bincode errors to StorageError
impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for NearlineError {
    fn from(err: bincode::Error) -> Self {
        NearlineError::Storage(StorageError::from(err))
    }
}

impl From<serde_json::Error> for NearlineError {
    fn from(err: serde_json::Error) -> Self {
        NearlineError::Storage(StorageError::serialization(err.to_string()))
    }
}

/// Validation errors for input data.
///
/// These errors indicate problems with data provided by the caller.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Embedding dimension doesn't match the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// Embedding contains values that cannot be indexed.
    #[error("Invalid embedding: {reason}")]
    InvalidEmbedding {
        /// What is wrong with the values.
        reason: String,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid embedding error.
    pub fn invalid_embedding(reason: impl Into<String>) -> Self {
        Self::InvalidEmbedding {
            reason: reason.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }
}

/// Not found errors.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// No live record with the given id.
    #[error("Record not found: {0}")]
    Record(String),
}

impl NotFoundError {
    /// Creates a record not found error.
    pub fn record(id: impl ToString) -> Self {
        Self::Record(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NearlineError::config("Invalid dimension");
        assert_eq!(err.to_string(), "Configuration error: Invalid dimension");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::FormatVersionMismatch {
            expected: 2,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "Artifact format version mismatch: expected 2, found 1"
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::dimension_mismatch(384, 768);
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 384, got 768"
        );
    }

    #[test]
    fn test_not_found_error_display() {
        let err = NotFoundError::record("abc-123");
        assert_eq!(err.to_string(), "Record not found: abc-123");
    }

    #[test]
    fn test_is_not_found() {
        let err: NearlineError = NotFoundError::record("test").into();
        assert!(err.is_not_found());
        assert!(!err.is_validation());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_dimension_mismatch_kind() {
        let err: NearlineError = ValidationError::dimension_mismatch(2, 3).into();
        assert!(err.is_dimension_mismatch());
        assert!(err.is_validation());
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
        assert_eq!(err.kind().http_status(), 422);
    }

    #[test]
    fn test_corrupt_predicates() {
        let err: NearlineError = StorageError::corrupted("bad magic").into();
        assert!(err.is_corrupt());
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let err: NearlineError = StorageError::Locked("artifact.lock".into()).into();
        assert!(!err.is_corrupt());
        assert_eq!(err.kind().http_status(), 503);
    }

    #[test]
    fn test_timeout_and_query_kinds() {
        let err = NearlineError::timeout(Duration::from_millis(5));
        assert!(err.is_timeout());
        assert_eq!(err.kind().http_status(), 504);

        let err = NearlineError::invalid_query("k must be at least 1");
        assert!(err.is_invalid_query());
        assert_eq!(err.to_string(), "Invalid query: k must be at least 1");
    }

    #[test]
    fn test_error_conversion_chain() {
        // Simulate a storage error propagating up
        fn inner() -> Result<()> {
            Err(StorageError::corrupted("test corruption"))?
        }

        let result = inner();
        assert!(result.is_err());
        assert!(result.unwrap_err().is_corrupt());
    }
}
