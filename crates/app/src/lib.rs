//! Process wiring: picks a storage backend, starts the audit queue and builds
//! the services on top of them.

pub mod services;

pub use services::{App, AppServices, Services, StartupError};
