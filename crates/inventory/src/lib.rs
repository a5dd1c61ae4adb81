//! Inventory domain module.
//!
//! This crate contains the business rules for stock tracking, implemented
//! purely as deterministic domain logic (no IO, no storage, no clocks beyond
//! the timestamps callers pass in).
//!
//! - [`item`]: items and their cost fields
//! - [`location`]: warehouses and bins
//! - [`stock`]: the stock projection key and quantity transitions
//! - [`movement`]: movement requests and the immutable movement record
//! - [`ledger`]: journal entries, chain verification and replay
//! - [`costing`]: weighted-average cost blending

pub mod costing;
pub mod item;
pub mod ledger;
pub mod location;
pub mod movement;
pub mod stock;

pub use costing::weighted_average_cost;
pub use item::{Item, ItemKind, ItemUpdate, NewItem};
pub use ledger::{ChainBreak, LedgerEntry, replay, verify_chain};
pub use location::{Bin, Warehouse};
pub use movement::{MovementRequest, StockMovement};
pub use stock::{Direction, Stock, StockKey, StockTransition, plan_transition};
