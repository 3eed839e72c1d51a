//! Agent runtime.
//!
//! Turns an [`agis_core::ExecutionContext`] into a finalized [`agis_core::Run`]:
//!
//! 1. **Gates** (`orchestrator`) - connectors, credentials, PII configuration, tenant budget
//! 2. **Approval** - runs whose scope requires review park in `needs_review`
//! 3. **Invocation** (`logic`, `registry`) - pluggable agent logic resolved by key
//! 4. **Enforcement** (`meter`, `guardrails`) - tool-call scope and ceilings checked mid-run
//!
//! Agent logic never decides cost or status. The orchestrator prices metered usage with the
//! configured cost model and owns every lifecycle transition.

pub mod guardrails;
pub mod logic;
pub mod meter;
pub mod orchestrator;
pub mod registry;

pub use guardrails::{ActionPolicy, GuardrailDecision};
pub use logic::{AgentInvocation, AgentLogic, AgentOutput, EchoLogic};
pub use meter::{MeterError, UsageMeter};
pub use orchestrator::{OrchestratorSettings, RunOrchestrator, DEFAULT_ACTOR};
pub use registry::LogicRegistry;
