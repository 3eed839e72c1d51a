use std::collections::HashMap;

use tokio::sync::RwLock;

use agis_core::audit::AuditEvent;
use agis_core::domain::run::{Run, RunId, RunStatus, TenantId};
use agis_core::records::{RunSink, SinkError};

use super::{AuditLogRepository, RepositoryError, RunRepository};

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: RwLock<HashMap<String, Run>>,
}

#[async_trait::async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&id.0).cloned())
    }

    async fn save(&self, run: &Run) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        runs.insert(run.id.0.clone(), run.clone());
        Ok(())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RunStatus>,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        let mut matching = runs
            .values()
            .filter(|run| &run.tenant_id == tenant_id)
            .filter(|run| status.map_or(true, |status| run.status == status))
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[async_trait::async_trait]
impl RunSink for InMemoryRunRepository {
    async fn record(&self, run: &Run) -> Result<(), SinkError> {
        run.check_invariants().map_err(|error| SinkError::Rejected(error.to_string()))?;

        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id.0) {
            return Err(SinkError::Rejected(format!("run {} was already recorded", run.id)));
        }
        runs.insert(run.id.0.clone(), run.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    events: RwLock<Vec<AuditEvent>>,
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write().await;
        if events.iter().any(|existing| existing.event_id == event.event_id) {
            return Err(RepositoryError::Conflict(format!(
                "audit event {} already appended",
                event.event_id
            )));
        }
        events.push(event.clone());
        Ok(())
    }

    async fn list_for_run(&self, run_id: &RunId) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|event| event.run_id.as_ref() == Some(run_id)).cloned().collect())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|event| &event.tenant_id == tenant_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
