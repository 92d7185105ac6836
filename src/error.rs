use thiserror::Error;
use uuid::Uuid;

/// Errors from grade-tree operations.
#[derive(Debug, Error)]
pub enum GradeError {
    /// Input rejected before any mutation was attempted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation does not apply to the node in its current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The referenced enrollment or grade entry does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    /// Underlying persistence failure, propagated unchanged.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
