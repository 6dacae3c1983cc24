use thiserror::Error;
use uuid::Uuid;

use crate::types::JobStatus;

/// Enumeration of errors for operations on the job store.
/// Errors that can originate from sqlx are wrapped to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("illegal status transition for job {job}: {from} -> {to}")]
    IllegalTransition {
        job: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("could not serialize jsonb field: {error}")]
    SerializationError { error: serde_json::Error },
}

impl StoreError {
    /// Transient backend errors are retried inside the store primitives with
    /// backoff; anything else surfaces immediately and fails the current job.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::QueryError { error, .. } => matches!(
                error,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Enumeration of errors for operations on the work queue.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("could not serialize envelope: {error}")]
    SerializationError { error: serde_json::Error },
}
