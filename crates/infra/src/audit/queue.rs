//! Bounded audit queue with an explicit start / drain / shutdown lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AuditRecord, AuditSink, AuditWriter};
use crate::config::AuditConfig;

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> AuditStats {
        AuditStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Audit queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Accepted into the queue.
    pub enqueued: u64,
    /// Written by the worker.
    pub written: u64,
    /// Rejected by the writer.
    pub failed: u64,
    /// Refused because the queue was full or shut down.
    pub dropped: u64,
}

/// Producer side; cheap to clone and share between services.
#[derive(Debug, Clone)]
pub struct AuditQueue {
    tx: mpsc::Sender<AuditRecord>,
    counters: Arc<Counters>,
}

/// Outcome of [`AuditWorkerHandle::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditShutdown {
    /// Everything queued before shutdown was handed to the writer.
    pub drained: bool,
    pub stats: AuditStats,
}

/// Handle to the running worker.
#[derive(Debug)]
pub struct AuditWorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl AuditQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn start<W: AuditWriter>(writer: W, config: &AuditConfig) -> (Self, AuditWorkerHandle) {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());

        let join = tokio::spawn(run_worker(writer, rx, shutdown_rx, Arc::clone(&counters)));
        info!(capacity, "audit queue started");

        (
            Self {
                tx,
                counters: Arc::clone(&counters),
            },
            AuditWorkerHandle {
                shutdown: Some(shutdown_tx),
                join,
                counters,
            },
        )
    }

    pub fn stats(&self) -> AuditStats {
        self.counters.snapshot()
    }
}

impl AuditSink for AuditQueue {
    fn log(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    resource = %record.resource,
                    resource_id = %record.resource_id,
                    action = %record.action,
                    "audit queue full; record dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    resource = %record.resource,
                    resource_id = %record.resource_id,
                    action = %record.action,
                    "audit queue shut down; record dropped"
                );
            }
        }
    }
}

impl AuditWorkerHandle {
    pub fn stats(&self) -> AuditStats {
        self.counters.snapshot()
    }

    /// Stop intake, drain what is queued, and wait up to `timeout` for the
    /// worker to finish. A worker still busy after `timeout` is aborted.
    pub async fn shutdown(mut self, timeout: Duration) -> AuditShutdown {
        if let Some(signal) = self.shutdown.take() {
            let _ = signal.send(());
        }

        let drained = match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "audit worker terminated abnormally");
                false
            }
            Err(_) => {
                warn!(?timeout, "audit queue did not drain in time; aborting worker");
                self.join.abort();
                false
            }
        };

        let stats = self.counters.snapshot();
        info!(drained, ?stats, "audit queue stopped");
        AuditShutdown { drained, stats }
    }
}

async fn run_worker<W: AuditWriter>(
    writer: W,
    mut rx: mpsc::Receiver<AuditRecord>,
    mut shutdown: oneshot::Receiver<()>,
    counters: Arc<Counters>,
) {
    loop {
        tokio::select! {
            biased;

            // A dropped handle counts as a shutdown request too.
            _ = &mut shutdown => {
                rx.close();
                while let Some(record) = rx.recv().await {
                    write_one(&writer, &record, &counters).await;
                }
                break;
            }
            maybe = rx.recv() => match maybe {
                Some(record) => write_one(&writer, &record, &counters).await,
                None => break,
            },
        }
    }
    debug!("audit worker exited");
}

async fn write_one<W: AuditWriter>(writer: &W, record: &AuditRecord, counters: &Counters) {
    match writer.write(record).await {
        Ok(()) => {
            counters.written.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                error = %e,
                audit_id = %record.id,
                resource = %record.resource,
                "audit write failed"
            );
        }
    }
}
