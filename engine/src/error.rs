//! Error types for the FitSync engine.

use crate::{CollectionKind, RecordId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the FitSync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("record not found: {collection}/{id}")]
    RecordNotFound {
        collection: CollectionKind,
        id: RecordId,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("field '{0}' is immutable")]
    ImmutableField(String),

    // Mutation errors
    #[error("record already exists: {0}")]
    RecordAlreadyExists(RecordId),

    #[error("mutation on deleted record: {0}")]
    MutationOnDeleted(RecordId),

    #[error("no owner is signed in")]
    OwnerMissing,

    #[error("record {id} belongs to owner '{actual}', not '{expected}'")]
    OwnerMismatch {
        id: RecordId,
        expected: String,
        actual: String,
    },

    #[error("invalid ordering: {0}")]
    InvalidOrder(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

impl Error {
    /// Whether the error describes a payload the schema refuses.
    ///
    /// Mutation functions report these to the caller as a rejection
    /// instead of failing the call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidPayload(_)
                | Error::MissingRequiredField(_)
                | Error::TypeMismatch { .. }
                | Error::ImmutableField(_)
                | Error::InvalidOrder(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
