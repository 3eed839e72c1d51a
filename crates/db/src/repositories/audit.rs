use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::Row;

use agis_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use agis_core::domain::agent::AgentKey;
use agis_core::domain::run::{RunId, TenantId};

use super::{format_timestamp, parse_timestamp, AuditLogRepository, RepositoryError};
use crate::DbPool;

const AUDIT_COLUMNS: &str = "id, run_id, tenant_id, agent_key, correlation_id, event_type,
                             category, actor, outcome, metadata_json, occurred_at";

/// Append-only store for audit events.
pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Appends events in order inside one transaction.
    pub async fn append_all(&self, events: &[AuditEvent]) -> Result<usize, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            insert_event(&mut *tx, event).await?;
        }
        tx.commit().await?;
        Ok(events.len())
    }
}

async fn insert_event<'e, E>(executor: E, event: &AuditEvent) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let metadata_json = serde_json::to_string(&event.metadata)
        .map_err(|e| RepositoryError::Encode(e.to_string()))?;

    sqlx::query(
        "INSERT INTO audit_log (id, run_id, tenant_id, agent_key, correlation_id, event_type,
                                category, actor, outcome, metadata_json, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.run_id.as_ref().map(|id| id.0.as_str()))
    .bind(&event.tenant_id.0)
    .bind(event.agent_key.as_ref().map(|key| key.0.as_str()))
    .bind(&event.correlation_id)
    .bind(&event.event_type)
    .bind(event.category.as_str())
    .bind(&event.actor)
    .bind(event.outcome.as_str())
    .bind(metadata_json)
    .bind(format_timestamp(event.occurred_at))
    .execute(executor)
    .await?;

    Ok(())
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let category_str: String = row.try_get("category").map_err(decode)?;
    let outcome_str: String = row.try_get("outcome").map_err(decode)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode)?;
    let occurred_at_str: String = row.try_get("occurred_at").map_err(decode)?;

    let category = AuditCategory::parse(&category_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit category `{category_str}`")))?;
    let outcome = AuditOutcome::parse(&outcome_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit outcome `{outcome_str}`")))?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|e| RepositoryError::Decode(format!("metadata_json: {e}")))?;

    Ok(AuditEvent {
        event_id: row.try_get("id").map_err(decode)?,
        run_id: row.try_get::<Option<String>, _>("run_id").map_err(decode)?.map(RunId),
        tenant_id: TenantId(row.try_get("tenant_id").map_err(decode)?),
        agent_key: row.try_get::<Option<String>, _>("agent_key").map_err(decode)?.map(AgentKey),
        correlation_id: row.try_get("correlation_id").map_err(decode)?,
        event_type: row.try_get("event_type").map_err(decode)?,
        category,
        actor: row.try_get("actor").map_err(decode)?,
        outcome,
        metadata,
        occurred_at: parse_timestamp("occurred_at", &occurred_at_str)?,
    })
}

#[async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        insert_event(&self.pool, event).await
    }

    async fn list_for_run(&self, run_id: &RunId) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log
             WHERE run_id = ?
             ORDER BY occurred_at ASC, rowid ASC"
        ))
        .bind(&run_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log
             WHERE tenant_id = ?
             ORDER BY occurred_at DESC, rowid DESC
             LIMIT ?"
        ))
        .bind(&tenant_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()
    }
}
