//! Error types for the Vestry engine.

use crate::{EntityType, RecordId};
use thiserror::Error;

/// All possible errors from the Vestry engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Record errors
    #[error("record not found: {entity_type}/{id}")]
    RecordNotFound { entity_type: EntityType, id: RecordId },

    #[error("record already exists: {entity_type}/{id}")]
    RecordAlreadyExists { entity_type: EntityType, id: RecordId },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    // Validation errors
    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    pub(crate) fn not_found(entity_type: &str, id: &str) -> Self {
        Self::RecordNotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }

    pub(crate) fn already_exists(entity_type: &str, id: &str) -> Self {
        Self::RecordAlreadyExists {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
