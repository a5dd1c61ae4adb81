use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage backend failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row lock could not be acquired in time.
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// The backend aborted the transaction to break a lock cycle or a
    /// serialization conflict.
    #[error("deadlock: {0}")]
    Deadlock(String),

    /// A uniqueness, reference or check constraint rejected a write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Transport, pool or other backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether re-running the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout(_) | StoreError::Deadlock(_))
    }
}
