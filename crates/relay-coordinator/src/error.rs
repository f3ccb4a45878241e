use std::time::Duration;

use relay_core::executor::ExecutorError;
use relay_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Unknown session or question; never silently treated as success.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before any mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The session's current status does not admit the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("executor timed out after {0:?}")]
    ExecutorTimeout(Duration),

    #[error("malformed executor result: {0}")]
    ExecutorMalformed(String),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Fatal to the in-flight call; retries are the caller's concern.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CoordinatorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}
