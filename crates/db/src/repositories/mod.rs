use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use agis_core::audit::AuditEvent;
use agis_core::domain::run::{Run, RunId, RunStatus, TenantId};

pub mod audit;
pub mod memory;
pub mod run;

pub use audit::SqlAuditLogRepository;
pub use memory::{InMemoryAuditLogRepository, InMemoryRunRepository};
pub use run::SqlRunRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError>;
    /// Inserts or replaces the run with the same id.
    async fn save(&self, run: &Run) -> Result<(), RepositoryError>;
    /// Newest first.
    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RunStatus>,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError>;
    /// Oldest first.
    async fn list_for_run(&self, run_id: &RunId) -> Result<Vec<AuditEvent>, RepositoryError>;
    /// Newest first.
    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, RepositoryError>;
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn to_sql_integer(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value)
        .map_err(|_| RepositoryError::Encode(format!("{column} value {value} exceeds i64 range")))
}

pub(crate) fn from_sql_integer(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column} holds negative value {value}")))
}
