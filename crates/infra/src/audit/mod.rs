//! Audit trail.
//!
//! Audit is observability, not correctness: services hand records to an
//! [`AuditSink`] after their unit of work has committed, and never wait on it.
//! The production sink is [`AuditQueue`], a bounded queue drained by one
//! background worker into an [`AuditWriter`].

mod queue;
mod writers;

pub use queue::{AuditQueue, AuditShutdown, AuditStats, AuditWorkerHandle};
pub use writers::{InMemoryAuditWriter, PostgresAuditWriter, TracingAuditWriter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use stockledger_core::{Entity, UserId};

use crate::context::OperationContext;
use crate::store::StoreError;

/// One audited change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub user_id: UserId,
    pub resource: String,
    pub resource_id: String,
    pub action: String,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub correlation_id: Uuid,
}

impl AuditRecord {
    pub fn new(
        ctx: &OperationContext,
        resource: &str,
        resource_id: impl ToString,
        action: &str,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            user_id: ctx.user_id,
            resource: resource.to_string(),
            resource_id: resource_id.to_string(),
            action: action.to_string(),
            before: None,
            after: None,
            correlation_id: ctx.correlation_id,
        }
    }

    /// Creation of a master-data entity, keyed on its id.
    pub fn created<E: Entity + Serialize>(
        ctx: &OperationContext,
        resource: &str,
        entity: &E,
    ) -> Self {
        Self::new(ctx, resource, entity.id(), "create").with_after(entity)
    }

    /// Change of a master-data entity, keyed on the id of its new state.
    pub fn changed<E: Entity + Serialize>(
        ctx: &OperationContext,
        resource: &str,
        action: &str,
        before: &E,
        after: &E,
    ) -> Self {
        Self::new(ctx, resource, after.id(), action)
            .with_before(before)
            .with_after(after)
    }

    pub fn with_before<T: Serialize>(mut self, state: &T) -> Self {
        self.before = to_json(&self.resource, state);
        self
    }

    pub fn with_after<T: Serialize>(mut self, state: &T) -> Self {
        self.after = to_json(&self.resource, state);
        self
    }
}

fn to_json<T: Serialize>(resource: &str, state: &T) -> Option<JsonValue> {
    match serde_json::to_value(state) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(resource, error = %e, "audit state not serializable; recorded without it");
            None
        }
    }
}

/// Fire-and-forget destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Must not block or fail the caller.
    fn log(&self, record: AuditRecord);
}

/// Sink that discards everything (audit disabled).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn log(&self, _record: AuditRecord) {}
}

/// Durable destination the queue worker writes to.
#[async_trait]
pub trait AuditWriter: Send + Sync + 'static {
    async fn write(&self, record: &AuditRecord) -> Result<(), StoreError>;
}
