//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the shared error model and decimal helpers used by
//! the inventory and production crates.

pub mod decimal;
pub mod entity;
pub mod error;
pub mod id;

pub use decimal::{Money, Quantity, DECIMAL_SCALE};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    BinId, BomId, ItemId, LedgerEntryId, MovementId, ProductionRecordId, UserId, WarehouseId,
};
