//! Application services.
//!
//! Each public operation runs in exactly one unit of work obtained from the
//! [`UnitOfWorkManager`](crate::store::UnitOfWorkManager). Steps shared
//! between operations (posting a movement, checking a location) take the
//! transaction handle explicitly instead of opening their own.
//!
//! Audit records are handed to the [`AuditSink`](crate::audit::AuditSink)
//! after commit, never before.

mod catalog;
mod error;
mod production;
mod reconciliation;
mod stock_movement;

pub use catalog::CatalogService;
pub use error::LedgerError;
pub use production::{ProductionEstimate, ProductionOutcome, ProductionService};
pub use reconciliation::{ReconciliationReport, ReconciliationService};
pub use stock_movement::{PostedMovement, StockMovementService};
