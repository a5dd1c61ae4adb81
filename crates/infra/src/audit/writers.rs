use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use super::{AuditRecord, AuditWriter};
use crate::store::StoreError;
use crate::store::postgres::map_sqlx_error;

/// Emits each record as a structured log line on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditWriter;

#[async_trait]
impl AuditWriter for TracingAuditWriter {
    async fn write(&self, record: &AuditRecord) -> Result<(), StoreError> {
        info!(
            target: "audit",
            audit_id = %record.id,
            user_id = %record.user_id,
            resource = %record.resource,
            resource_id = %record.resource_id,
            action = %record.action,
            correlation_id = %record.correlation_id,
            before = ?record.before,
            after = ?record.after,
            "audit"
        );
        Ok(())
    }
}

/// Keeps records in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditWriter {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl InMemoryAuditWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditWriter for InMemoryAuditWriter {
    async fn write(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Backend("audit buffer poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

/// Appends records to the `audit_log` table.
#[derive(Debug, Clone)]
pub struct PostgresAuditWriter {
    pool: PgPool,
}

impl PostgresAuditWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditWriter for PostgresAuditWriter {
    async fn write(&self, record: &AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, occurred_at, user_id, resource, resource_id, action,
                before_state, after_state, correlation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.occurred_at)
        .bind(record.user_id.as_uuid())
        .bind(&record.resource)
        .bind(&record.resource_id)
        .bind(&record.action)
        .bind(&record.before)
        .bind(&record.after)
        .bind(record.correlation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_audit_record", e))?;
        Ok(())
    }
}
