//! Domain errors for the run lineage cache.

use thiserror::Error;
use uuid::Uuid;

use super::models::{ArtifactCategory, RunStatus};

/// Domain-level errors that can occur in the run cache.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("No {category} artifact found for run {run_id}")]
    ArtifactNotFound { run_id: Uuid, category: ArtifactCategory },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Cache chain from run {run_id} is unreliable: {reason}")]
    DanglingCacheChain { run_id: Uuid, reason: String },

    #[error("Stored {category} artifact for run {run_id} failed validation: {reason}")]
    ArtifactDecodeError {
        run_id: Uuid,
        category: ArtifactCategory,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: run {0} was modified")]
    ConcurrencyConflict(Uuid),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
