pub mod audit;
pub mod budget;
pub mod cancel;
pub mod config;
pub mod connectors;
pub mod cost;
pub mod domain;
pub mod errors;
pub mod pii;
pub mod records;
pub mod run_state;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use budget::{
    BudgetAmounts, BudgetCharge, BudgetLedger, ChargeDecision, InMemoryBudgetLedger, LedgerError,
    Reservation, TenantAllowance,
};
pub use cancel::{CancelReason, CancellationToken};
pub use connectors::{
    CatalogError, ConnectorDirectory, CredentialGap, CredentialVault, InMemoryCredentialVault,
    ReadinessSummary,
};
pub use cost::{CostBreakdown, CostError, CostModel, CostRates, DeterministicCostModel};
pub use domain::agent::{AgentCategory, AgentDefinition, AgentKey, TriggerKind};
pub use domain::connector::{Connector, ConnectorCredentials, ConnectorType};
pub use domain::run::{
    AgentConfig, BudgetConfig, ExecutionContext, JsonMap, PiiRedactionConfig, Run, RunId,
    RunStatus, RunUsage, ScopeConfig, TenantId,
};
pub use errors::{DomainError, RunFailure};
pub use pii::{PiiError, PiiRedactor, REDACTION_MARKER};
pub use records::{InMemoryRunSink, RunSink, SinkError};
pub use run_state::{RunEvent, RunTransition};
