use rust_decimal::Decimal;
use thiserror::Error;

use stockledger_core::{DomainError, ItemId};

use crate::store::StoreError;

/// Error returned by every service operation.
///
/// Any of these raised inside a unit of work aborts the whole operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("{resource} is inactive: {id}")]
    Inactive { resource: &'static str, id: String },

    #[error("insufficient stock for item {item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: ItemId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stored state contradicts itself (e.g. a broken ledger chain).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

impl LedgerError {
    pub(crate) fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Re-running the whole operation may succeed (lock timeout, deadlock).
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StorageFailure(e) if e.is_retryable())
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidInput(msg) => LedgerError::InvalidInput(msg),
            DomainError::NotFound { resource, id } => LedgerError::NotFound { resource, id },
            DomainError::Inactive { resource, id } => LedgerError::Inactive { resource, id },
            DomainError::InsufficientStock {
                item_id,
                available,
                requested,
            } => LedgerError::InsufficientStock {
                item_id,
                available,
                requested,
            },
            DomainError::InvariantViolation(msg) => LedgerError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => LedgerError::InvalidInput(msg),
        }
    }
}

/// Unwrap a lookup or fail with `NotFound`.
pub(crate) fn require<T>(
    value: Option<T>,
    resource: &'static str,
    id: impl ToString,
) -> Result<T, LedgerError> {
    value.ok_or_else(|| LedgerError::not_found(resource, id))
}
