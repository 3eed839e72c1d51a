use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use agis_core::cancel::CancellationToken;
use agis_core::domain::agent::AgentKey;
use agis_core::domain::run::{BudgetConfig, JsonMap, RunId, RunUsage, TenantId};

use crate::meter::UsageMeter;

/// Everything an agent implementation receives for one run. `inputs` are already redacted
/// when the tenant enabled PII redaction.
#[derive(Clone, Debug)]
pub struct AgentInvocation {
    pub agent_key: AgentKey,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub inputs: JsonMap,
    pub caps: BudgetConfig,
    pub meter: UsageMeter,
}

impl AgentInvocation {
    pub fn cancellation(&self) -> &CancellationToken {
        self.meter.cancellation()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub outputs: JsonMap,
    /// Self-reported usage. The orchestrator bills the larger of this and what the meter saw.
    #[serde(default)]
    pub usage: RunUsage,
}

impl AgentOutput {
    pub fn new(outputs: JsonMap) -> Self {
        Self { outputs, usage: RunUsage::default() }
    }

    pub fn with_usage(mut self, usage: RunUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// The behaviour behind one or more agent keys. Implementations should report each tool
/// call through `invocation.meter` and stop when it returns an error.
#[async_trait]
pub trait AgentLogic: Send + Sync {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentOutput>;
}

/// Returns its inputs untouched and consumes nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoLogic;

#[async_trait]
impl AgentLogic for EchoLogic {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentOutput> {
        Ok(AgentOutput::new(invocation.inputs))
    }
}
