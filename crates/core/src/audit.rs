use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentKey;
use crate::domain::run::{ExecutionContext, RunId, TenantId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Intake,
    Connector,
    Budget,
    Privacy,
    Approval,
    Execution,
    Persistence,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Connector => "connector",
            Self::Budget => "budget",
            Self::Privacy => "privacy",
            Self::Approval => "approval",
            Self::Execution => "execution",
            Self::Persistence => "persistence",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "intake" => Some(Self::Intake),
            "connector" => Some(Self::Connector),
            "budget" => Some(Self::Budget),
            "privacy" => Some(Self::Privacy),
            "approval" => Some(Self::Approval),
            "execution" => Some(Self::Execution),
            "persistence" => Some(Self::Persistence),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Identity fields shared by every event emitted while processing one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub run_id: Option<RunId>,
    pub tenant_id: TenantId,
    pub agent_key: Option<AgentKey>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn for_run(context: &ExecutionContext, actor: impl Into<String>) -> Self {
        Self {
            run_id: Some(context.run_id.clone()),
            tenant_id: context.tenant_id.clone(),
            agent_key: Some(context.agent_key.clone()),
            correlation_id: context.run_id.0.clone(),
            actor: actor.into(),
        }
    }

    pub fn event(
        &self,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            run_id: self.run_id.clone(),
            tenant_id: self.tenant_id.clone(),
            agent_key: self.agent_key.clone(),
            correlation_id: self.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: self.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub run_id: Option<RunId>,
    pub tenant_id: TenantId,
    pub agent_key: Option<AgentKey>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drains recorded events, e.g. to forward them to durable storage.
    pub fn take(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, InMemoryAuditSink};
    use crate::domain::run::{AgentConfig, ExecutionContext};

    #[test]
    fn events_carry_run_identity_and_metadata() {
        let context = ExecutionContext::new(
            "pr-reviewer",
            "PR Reviewer",
            "tenant-a",
            Map::new(),
            AgentConfig::default(),
        );
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::for_run(&context, "orchestrator");

        sink.emit(
            audit
                .event("run.transition", AuditCategory::Execution, AuditOutcome::Success)
                .with_metadata("from", "queued")
                .with_metadata("to", "running"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_id.as_ref(), Some(&context.run_id));
        assert_eq!(events[0].tenant_id.0, "tenant-a");
        assert_eq!(events[0].correlation_id, context.run_id.0);
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("running"));
    }

    #[test]
    fn take_drains_the_buffer() {
        let context = ExecutionContext::new(
            "forecaster",
            "Forecaster",
            "tenant-b",
            Map::new(),
            AgentConfig::default(),
        );
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::for_run(&context, "cli");
        sink.emit(audit.event("run.intake", AuditCategory::Intake, AuditOutcome::Success));

        assert_eq!(sink.take().len(), 1);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn category_and_outcome_round_trip_from_storage_encoding() {
        for category in [
            AuditCategory::Intake,
            AuditCategory::Connector,
            AuditCategory::Budget,
            AuditCategory::Privacy,
            AuditCategory::Approval,
            AuditCategory::Execution,
            AuditCategory::Persistence,
        ] {
            assert_eq!(AuditCategory::parse(category.as_str()), Some(category));
        }
        for outcome in [AuditOutcome::Success, AuditOutcome::Rejected, AuditOutcome::Failed] {
            assert_eq!(AuditOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }
}
