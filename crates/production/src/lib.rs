//! Production domain module.
//!
//! Bills of materials and the deterministic planning of a production run
//! (which stock rows to lock, in which order, how much to consume and what the
//! run costs). No IO, no storage.

pub mod bom;
pub mod plan;
pub mod record;

pub use bom::{BillOfMaterials, BomComponent, NewBom, NewBomComponent};
pub use plan::{ComponentRequirement, ProductionPlan, Shortfall};
pub use record::ProductionRecord;
