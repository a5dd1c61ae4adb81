use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use stockledger_infra::audit::{
    AuditQueue, AuditShutdown, AuditSink, AuditWorkerHandle, NullAuditSink, PostgresAuditWriter,
    TracingAuditWriter,
};
use stockledger_infra::config::{AppConfig, ConfigError, StoreBackend};
use stockledger_infra::services::{
    CatalogService, ProductionService, ReconciliationService, StockMovementService,
};
use stockledger_infra::store::{
    InMemoryStore, PostgresStore, Store, StoreError, UnitOfWorkManager,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Every service, sharing one store and one audit sink.
pub struct Services<S: Store> {
    pub catalog: CatalogService<S>,
    pub movements: StockMovementService<S>,
    pub production: ProductionService<S>,
    pub reconciliation: ReconciliationService<S>,
}

impl<S: Store> Clone for Services<S> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            movements: self.movements.clone(),
            production: self.production.clone(),
            reconciliation: self.reconciliation.clone(),
        }
    }
}

impl<S: Store> Services<S> {
    pub fn new(store: Arc<S>, audit: Arc<dyn AuditSink>) -> Self {
        let uow = UnitOfWorkManager::new(store);
        Self {
            catalog: CatalogService::new(uow.clone(), Arc::clone(&audit)),
            movements: StockMovementService::new(uow.clone(), Arc::clone(&audit)),
            production: ProductionService::new(uow.clone(), audit),
            reconciliation: ReconciliationService::new(uow),
        }
    }
}

#[derive(Clone)]
pub enum AppServices {
    InMemory(Services<InMemoryStore>),
    Postgres(Services<PostgresStore>),
}

impl AppServices {
    pub fn backend(&self) -> StoreBackend {
        match self {
            AppServices::InMemory(_) => StoreBackend::Memory,
            AppServices::Postgres(_) => StoreBackend::Postgres,
        }
    }
}

/// A started process: services plus the resources that need an orderly stop.
pub struct App {
    config: AppConfig,
    services: AppServices,
    audit_worker: Option<AuditWorkerHandle>,
    postgres: Option<PostgresStore>,
}

impl App {
    /// Connect the configured backend, apply migrations if asked to, and start
    /// the audit queue. Logging is not initialized here.
    #[instrument(skip(config), fields(backend = ?config.store.backend), err)]
    pub async fn start(config: AppConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let app = match config.store.backend {
            StoreBackend::Memory => {
                let store = Arc::new(InMemoryStore::with_lock_timeout(
                    config.database.lock_timeout(),
                ));
                let (audit, audit_worker) = start_audit(&config, || TracingAuditWriter);
                App {
                    services: AppServices::InMemory(Services::new(store, audit)),
                    audit_worker,
                    postgres: None,
                    config,
                }
            }
            StoreBackend::Postgres => {
                let store = PostgresStore::connect(&config.database).await?;
                if config.database.run_migrations {
                    store.migrate().await?;
                }
                let pool = store.pool().clone();
                let (audit, audit_worker) =
                    start_audit(&config, move || PostgresAuditWriter::new(pool));
                App {
                    services: AppServices::Postgres(Services::new(
                        Arc::new(store.clone()),
                        audit,
                    )),
                    audit_worker,
                    postgres: Some(store),
                    config,
                }
            }
        };

        info!(audit = app.audit_worker.is_some(), "application started");
        Ok(app)
    }

    pub fn backend(&self) -> StoreBackend {
        self.services.backend()
    }

    pub fn services(&self) -> &AppServices {
        &self.services
    }

    /// Drain the audit queue (bounded by `audit.shutdown_timeout_ms`), then
    /// close the connection pool. Returns the audit outcome when auditing was
    /// enabled.
    pub async fn shutdown(self) -> Option<AuditShutdown> {
        let audit = match self.audit_worker {
            Some(worker) => {
                let outcome = worker.shutdown(self.config.audit.shutdown_timeout()).await;
                if !outcome.drained {
                    warn!(stats = ?outcome.stats, "audit queue not drained");
                }
                Some(outcome)
            }
            None => None,
        };

        if let Some(store) = self.postgres {
            store.close().await;
        }
        info!("application stopped");
        audit
    }
}

fn start_audit<W, F>(
    config: &AppConfig,
    writer: F,
) -> (Arc<dyn AuditSink>, Option<AuditWorkerHandle>)
where
    W: stockledger_infra::audit::AuditWriter,
    F: FnOnce() -> W,
{
    if !config.audit.enabled {
        info!("audit disabled");
        return (Arc::new(NullAuditSink), None);
    }
    let (queue, worker) = AuditQueue::start(writer(), &config.audit);
    (Arc::new(queue), Some(worker))
}
