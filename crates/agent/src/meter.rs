//! Per-run usage accounting with mid-flight ceiling enforcement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agis_core::cancel::{CancelReason, CancellationToken};
use agis_core::cost::CostModel;
use agis_core::domain::run::{BudgetConfig, RunUsage};
use thiserror::Error;
use tracing::warn;

use crate::guardrails::{ActionPolicy, GuardrailDecision};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MeterError {
    #[error("run cancelled: {0}")]
    Cancelled(CancelReason),
    #[error("{reason_code}: {message}")]
    ActionDenied { reason_code: &'static str, message: String },
    #[error("tool call limit of {max_tool_calls} reached")]
    ToolCallLimit { max_tool_calls: u64 },
    #[error("cost limit of {max_cost_cents} cents exceeded (projected {projected_cents} cents)")]
    CostLimit { max_cost_cents: u64, projected_cents: u64 },
}

struct MeterState {
    tool_calls: AtomicU64,
    tokens_used: AtomicU64,
    caps: BudgetConfig,
    policy: ActionPolicy,
    cost_model: Arc<dyn CostModel>,
    cancel: CancellationToken,
}

/// The handle agent logic reports work through. Clones share counters.
#[derive(Clone)]
pub struct UsageMeter {
    state: Arc<MeterState>,
}

impl std::fmt::Debug for UsageMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageMeter")
            .field("usage", &self.usage())
            .field("caps", &self.state.caps)
            .finish_non_exhaustive()
    }
}

impl UsageMeter {
    pub fn new(
        caps: BudgetConfig,
        policy: ActionPolicy,
        cost_model: Arc<dyn CostModel>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state: Arc::new(MeterState {
                tool_calls: AtomicU64::new(0),
                tokens_used: AtomicU64::new(0),
                caps,
                policy,
                cost_model,
                cancel,
            }),
        }
    }

    /// Claims a slot for one tool call. A refused call is not counted.
    ///
    /// Scope denials only refuse the call; ceiling breaches also cancel the run.
    pub fn begin_tool_call(&self, action: &str) -> Result<u64, MeterError> {
        self.ensure_active()?;

        if let GuardrailDecision::Deny { reason_code, user_message } =
            self.state.policy.evaluate(action)
        {
            warn!(
                event_name = "run.meter.action_denied",
                action,
                reason_code,
                "tool call refused by tenant scope"
            );
            return Err(MeterError::ActionDenied { reason_code, message: user_message });
        }

        let max_tool_calls = self.state.caps.max_tool_calls;
        let claimed =
            self.state.tool_calls.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                match max_tool_calls {
                    Some(max) if current >= max => None,
                    _ => Some(current + 1),
                }
            });
        let previous = match claimed {
            Ok(previous) => previous,
            Err(_) => {
                let max_tool_calls = max_tool_calls.unwrap_or_default();
                self.state.cancel.cancel(CancelReason::ToolCallLimit { max_tool_calls });
                return Err(MeterError::ToolCallLimit { max_tool_calls });
            }
        };

        if let Err(error) = self.check_cost() {
            self.state.tool_calls.fetch_sub(1, Ordering::SeqCst);
            return Err(error);
        }

        Ok(previous + 1)
    }

    /// Records tokens already consumed, then checks the cost ceiling.
    pub fn record_tokens(&self, tokens: u64) -> Result<(), MeterError> {
        self.ensure_active()?;
        self.state
            .tokens_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(tokens))
            })
            .ok();
        self.check_cost()
    }

    pub fn usage(&self) -> RunUsage {
        RunUsage::new(
            self.state.tool_calls.load(Ordering::SeqCst),
            self.state.tokens_used.load(Ordering::SeqCst),
        )
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.state.cancel
    }

    fn ensure_active(&self) -> Result<(), MeterError> {
        match self.state.cancel.reason() {
            Some(reason) => Err(MeterError::Cancelled(reason)),
            None => Ok(()),
        }
    }

    fn check_cost(&self) -> Result<(), MeterError> {
        let Some(max_cost_cents) = self.state.caps.max_cost_cents else {
            return Ok(());
        };

        let projected_cents =
            self.state.cost_model.cost_cents(self.usage()).unwrap_or(u64::MAX);
        if projected_cents <= max_cost_cents {
            return Ok(());
        }

        self.state.cancel.cancel(CancelReason::CostLimit { max_cost_cents, projected_cents });
        Err(MeterError::CostLimit { max_cost_cents, projected_cents })
    }
}
