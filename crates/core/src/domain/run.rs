use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::agent::AgentKey;
use crate::errors::DomainError;

pub type JsonMap = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    NeedsReview,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::NeedsReview => "needs_review",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "needs_review" => Some(Self::NeedsReview),
            _ => None,
        }
    }

    /// Terminal from the orchestrator's point of view. A paused run counts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::NeedsReview)
    }

    /// Statuses that carry a `finished_at` timestamp.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_cost_cents: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub max_tool_calls: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default)]
    pub denied_actions: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiRedactionConfig {
    pub enabled: bool,
    #[serde(default)]
    pub patterns: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub cron: Option<String>,
    pub timezone: Option<String>,
}

/// Tenant-owned overrides for one agent. Every section is optional and an absent section
/// imposes no constraint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub budget: Option<BudgetConfig>,
    #[serde(default)]
    pub scope: Option<ScopeConfig>,
    #[serde(default)]
    pub pii_redaction: Option<PiiRedactionConfig>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

impl AgentConfig {
    pub fn requires_approval(&self) -> bool {
        self.scope.as_ref().is_some_and(|scope| scope.requires_approval)
    }

    pub fn pii_redaction_enabled(&self) -> bool {
        self.pii_redaction.as_ref().is_some_and(|pii| pii.enabled)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUsage {
    pub tool_calls: u64,
    pub tokens_used: u64,
}

impl RunUsage {
    pub fn new(tool_calls: u64, tokens_used: u64) -> Self {
        Self { tool_calls, tokens_used }
    }

    /// Component-wise maximum of two observations of the same run.
    pub fn merge_max(self, other: RunUsage) -> Self {
        Self {
            tool_calls: self.tool_calls.max(other.tool_calls),
            tokens_used: self.tokens_used.max(other.tokens_used),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub agent_key: AgentKey,
    pub agent_name: String,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    #[serde(default)]
    pub inputs: JsonMap,
    #[serde(default)]
    pub config: AgentConfig,
}

impl ExecutionContext {
    pub fn new(
        agent_key: impl Into<String>,
        agent_name: impl Into<String>,
        tenant_id: impl Into<String>,
        inputs: JsonMap,
        config: AgentConfig,
    ) -> Self {
        Self {
            agent_key: AgentKey(agent_key.into()),
            agent_name: agent_name.into(),
            tenant_id: TenantId(tenant_id.into()),
            run_id: RunId::generate(),
            inputs,
            config,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub agent_key: AgentKey,
    pub tenant_id: TenantId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub inputs: Option<JsonMap>,
    pub outputs: Option<JsonMap>,
    pub cost_cents: u64,
    pub tool_calls: Option<u64>,
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Run {
    pub fn queued(context: &ExecutionContext) -> Self {
        Self {
            id: context.run_id.clone(),
            agent_key: context.agent_key.clone(),
            tenant_id: context.tenant_id.clone(),
            status: RunStatus::Queued,
            started_at: Utc::now(),
            finished_at: None,
            inputs: None,
            outputs: None,
            cost_cents: 0,
            tool_calls: None,
            tokens_used: None,
            errors: Vec::new(),
        }
    }

    pub fn usage(&self) -> RunUsage {
        RunUsage::new(self.tool_calls.unwrap_or(0), self.tokens_used.unwrap_or(0))
    }

    /// Checks the record-level invariants a sink relies on.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.status.is_finished() != self.finished_at.is_some() {
            return Err(DomainError::InvariantViolation(format!(
                "run {} has status {} but finished_at is {}",
                self.id,
                self.status.as_str(),
                if self.finished_at.is_some() { "set" } else { "missing" }
            )));
        }

        if self.status == RunStatus::NeedsReview && self.cost_cents != 0 {
            return Err(DomainError::InvariantViolation(format!(
                "run {} is awaiting review but carries a cost of {} cents",
                self.id, self.cost_cents
            )));
        }

        if matches!(self.status, RunStatus::Queued | RunStatus::Running) && self.cost_cents != 0 {
            return Err(DomainError::InvariantViolation(format!(
                "run {} is not finalized but carries a cost of {} cents",
                self.id, self.cost_cents
            )));
        }

        Ok(())
    }
}
