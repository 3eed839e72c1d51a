use thiserror::Error;

use crate::connectors::CredentialGap;
use crate::domain::agent::AgentKey;
use crate::domain::connector::ConnectorType;
use crate::domain::run::RunStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid run transition from {from:?} to {to:?}")]
    InvalidRunTransition { from: RunStatus, to: RunStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Why a run ended in `failed`. The `Display` output is exactly the line recorded in
/// `Run::errors`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RunFailure {
    #[error("Missing connectors: {}", join_connectors(missing))]
    ConnectorUnavailable { missing: Vec<ConnectorType> },
    #[error("Missing credentials: {}", join_gaps(gaps))]
    CredentialsMissing { gaps: Vec<CredentialGap> },
    #[error("Budget exceeded: {detail}")]
    BudgetExceeded { detail: String },
    #[error("Run cancelled: {reason}")]
    Cancelled { reason: String },
    #[error("No agent logic registered for `{agent_key}`")]
    LogicUnavailable { agent_key: AgentKey },
    #[error("Configuration error: {message}")]
    Configuration { message: String },
    #[error("Budget ledger unavailable: {message}")]
    LedgerUnavailable { message: String },
    #[error("{message}")]
    ExecutionFailure { message: String },
}

impl RunFailure {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ConnectorUnavailable { .. } => "connector_unavailable",
            Self::CredentialsMissing { .. } => "credentials_missing",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Cancelled { .. } => "cancelled",
            Self::LogicUnavailable { .. } => "logic_unavailable",
            Self::Configuration { .. } => "configuration",
            Self::LedgerUnavailable { .. } => "ledger_unavailable",
            Self::ExecutionFailure { .. } => "execution_failure",
        }
    }
}

fn join_connectors(missing: &[ConnectorType]) -> String {
    missing.iter().map(ConnectorType::as_str).collect::<Vec<_>>().join(", ")
}

fn join_gaps(gaps: &[CredentialGap]) -> String {
    gaps.iter()
        .map(|gap| format!("{} ({})", gap.connector_type, gap.missing_keys.join(", ")))
        .collect::<Vec<_>>()
        .join(", ")
}
