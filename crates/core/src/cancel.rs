//! Cooperative cancellation shared between the orchestrator and agent logic.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CancelReason {
    Timeout { max_duration_ms: u64 },
    ToolCallLimit { max_tool_calls: u64 },
    CostLimit { max_cost_cents: u64, projected_cents: u64 },
    External { reason: String },
}

impl CancelReason {
    /// Ceiling breaches are reported as budget failures; external cancels are not.
    pub fn is_budget_breach(&self) -> bool {
        !matches!(self, Self::External { .. })
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { max_duration_ms } => {
                write!(f, "run exceeded max duration of {max_duration_ms} ms")
            }
            Self::ToolCallLimit { max_tool_calls } => {
                write!(f, "tool call limit of {max_tool_calls} reached")
            }
            Self::CostLimit { max_cost_cents, projected_cents } => write!(
                f,
                "cost limit of {max_cost_cents} cents exceeded (projected {projected_cents} cents)"
            ),
            Self::External { reason } => f.write_str(reason),
        }
    }
}

/// Clones observe the same state. The first reason recorded wins.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    state: Arc<watch::Sender<Option<CancelReason>>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { state: Arc::new(sender) }
    }

    /// Returns `false` when the token was already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.state.borrow().clone()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) -> CancelReason {
        let mut receiver = self.state.subscribe();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if receiver.changed().await.is_err() {
                // Unreachable while `self` holds the sender.
                std::future::pending::<()>().await;
            }
        }
    }
}
