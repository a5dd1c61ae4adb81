//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::ItemId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// missing or disabled master data, stock shortfalls). Storage and transport
/// failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (non-positive quantity, mismatched bin, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced resource does not exist.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// A referenced resource exists but is disabled.
    #[error("{resource} is inactive: {id}")]
    Inactive { resource: &'static str, id: String },

    /// An outbound quantity exceeds what is on hand.
    #[error("insufficient stock for item {item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: ItemId,
        available: Decimal,
        requested: Decimal,
    },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn inactive(resource: &'static str, id: impl ToString) -> Self {
        Self::Inactive {
            resource,
            id: id.to_string(),
        }
    }

    pub fn insufficient_stock(item_id: ItemId, available: Decimal, requested: Decimal) -> Self {
        Self::InsufficientStock {
            item_id,
            available,
            requested,
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
