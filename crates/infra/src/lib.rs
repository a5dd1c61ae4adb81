//! Infrastructure layer: storage backends, units of work, the orchestrating
//! services, audit trail and configuration.
//!
//! - [`store`]: repository traits, [`UnitOfWorkManager`](store::UnitOfWorkManager),
//!   in-memory and Postgres backends
//! - [`services`]: stock movements, production, catalog, reconciliation
//! - [`audit`]: the bounded audit queue and its writers
//! - [`config`]: configuration loading
//! - [`context`]: per-request caller identity and correlation id

pub mod audit;
pub mod config;
pub mod context;
pub mod services;
pub mod store;

#[cfg(test)]
mod integration_tests;
