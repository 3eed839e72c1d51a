//! Run lifecycle.
//!
//! Every status change goes through [`apply`], which rejects edges outside the lifecycle
//! and returns a [`RunTransition`] record for the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::run::{JsonMap, Run, RunStatus, RunUsage};
use crate::errors::{DomainError, RunFailure};

#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    /// A pre-start gate refused the run.
    Rejected { failure: RunFailure },
    ApprovalRequired { inputs: JsonMap },
    Started { inputs: JsonMap },
    Completed { outputs: JsonMap, usage: RunUsage, cost_cents: u64 },
    /// Logic error, cancellation or a ceiling breach after start. Usage is partial.
    Aborted { failure: RunFailure, usage: RunUsage, cost_cents: u64 },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Aborted { .. } => "aborted",
        }
    }

    fn edge(&self) -> (RunStatus, RunStatus) {
        match self {
            Self::Rejected { .. } => (RunStatus::Queued, RunStatus::Failed),
            Self::ApprovalRequired { .. } => (RunStatus::Queued, RunStatus::NeedsReview),
            Self::Started { .. } => (RunStatus::Queued, RunStatus::Running),
            Self::Completed { .. } => (RunStatus::Running, RunStatus::Succeeded),
            Self::Aborted { .. } => (RunStatus::Running, RunStatus::Failed),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTransition {
    pub from: RunStatus,
    pub to: RunStatus,
    pub event: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

pub fn apply(run: &mut Run, event: RunEvent) -> Result<RunTransition, DomainError> {
    let (from, to) = event.edge();
    if run.status != from {
        return Err(DomainError::InvalidRunTransition { from: run.status, to });
    }

    let occurred_at = Utc::now();
    let event_name = event.name();
    let reason = match event {
        RunEvent::Rejected { failure } => {
            let message = failure.to_string();
            run.errors.push(message.clone());
            run.finished_at = Some(occurred_at);
            message
        }
        RunEvent::ApprovalRequired { inputs } => {
            run.inputs = Some(inputs);
            "approval required before execution".to_string()
        }
        RunEvent::Started { inputs } => {
            run.inputs = Some(inputs);
            "agent logic invoked".to_string()
        }
        RunEvent::Completed { outputs, usage, cost_cents } => {
            run.outputs = Some(outputs);
            record_usage(run, usage, cost_cents);
            run.finished_at = Some(occurred_at);
            "agent logic completed".to_string()
        }
        RunEvent::Aborted { failure, usage, cost_cents } => {
            let message = failure.to_string();
            run.errors.push(message.clone());
            record_usage(run, usage, cost_cents);
            run.finished_at = Some(occurred_at);
            message
        }
    };
    run.status = to;

    Ok(RunTransition { from, to, event: event_name.to_string(), reason, occurred_at })
}

fn record_usage(run: &mut Run, usage: RunUsage, cost_cents: u64) {
    run.tool_calls = Some(usage.tool_calls);
    run.tokens_used = Some(usage.tokens_used);
    run.cost_cents = cost_cents;
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::{apply, RunEvent};
    use crate::domain::connector::ConnectorType;
    use crate::domain::run::{AgentConfig, ExecutionContext, Run, RunStatus, RunUsage};
    use crate::errors::{DomainError, RunFailure};

    fn queued() -> Run {
        Run::queued(&ExecutionContext::new(
            "pr-reviewer",
            "PR Reviewer",
            "tenant-a",
            Map::new(),
            AgentConfig::default(),
        ))
    }

    #[test]
    fn rejection_fails_queued_run_without_cost() {
        let mut run = queued();
        let transition = apply(
            &mut run,
            RunEvent::Rejected {
                failure: RunFailure::ConnectorUnavailable { missing: vec![ConnectorType::Notion] },
            },
        )
        .expect("queued runs can be rejected");

        assert_eq!(transition.from, RunStatus::Queued);
        assert_eq!(transition.to, RunStatus::Failed);
        assert_eq!(run.errors, vec!["Missing connectors: notion"]);
        assert_eq!(run.cost_cents, 0);
        assert!(run.finished_at.is_some());
        assert!(run.check_invariants().is_ok());
    }

    #[test]
    fn approval_pauses_without_finishing() {
        let mut run = queued();
        apply(&mut run, RunEvent::ApprovalRequired { inputs: Map::new() }).expect("valid edge");

        assert_eq!(run.status, RunStatus::NeedsReview);
        assert!(run.finished_at.is_none());
        assert_eq!(run.inputs, Some(Map::new()));
        assert!(run.check_invariants().is_ok());
    }

    #[test]
    fn completion_records_usage_and_cost() {
        let mut run = queued();
        apply(&mut run, RunEvent::Started { inputs: Map::new() }).expect("start");
        let transition = apply(
            &mut run,
            RunEvent::Completed { outputs: Map::new(), usage: RunUsage::new(3, 5_000), cost_cents: 4 },
        )
        .expect("complete");

        assert_eq!(transition.event, "completed");
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.tool_calls, Some(3));
        assert_eq!(run.tokens_used, Some(5_000));
        assert_eq!(run.cost_cents, 4);
        assert!(run.check_invariants().is_ok());
    }

    #[test]
    fn abort_keeps_partial_usage() {
        let mut run = queued();
        apply(&mut run, RunEvent::Started { inputs: Map::new() }).expect("start");
        apply(
            &mut run,
            RunEvent::Aborted {
                failure: RunFailure::BudgetExceeded { detail: "tool call limit of 2 reached".into() },
                usage: RunUsage::new(2, 0),
                cost_cents: 2,
            },
        )
        .expect("abort");

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.cost_cents, 2);
        assert_eq!(run.errors, vec!["Budget exceeded: tool call limit of 2 reached"]);
    }

    #[test]
    fn edges_outside_the_lifecycle_are_rejected() {
        let mut run = queued();
        let error = apply(
            &mut run,
            RunEvent::Completed { outputs: Map::new(), usage: RunUsage::default(), cost_cents: 0 },
        )
        .expect_err("queued runs cannot complete");
        assert_eq!(
            error,
            DomainError::InvalidRunTransition { from: RunStatus::Queued, to: RunStatus::Succeeded }
        );

        apply(&mut run, RunEvent::ApprovalRequired { inputs: Map::new() }).expect("pause");
        assert!(apply(&mut run, RunEvent::Started { inputs: Map::new() }).is_err());
        assert_eq!(run.status, RunStatus::NeedsReview);
    }

    #[test]
    fn finalized_cost_cannot_be_rewritten() {
        let mut run = queued();
        apply(&mut run, RunEvent::Started { inputs: Map::new() }).expect("start");
        apply(
            &mut run,
            RunEvent::Completed { outputs: Map::new(), usage: RunUsage::new(1, 0), cost_cents: 1 },
        )
        .expect("complete");

        let second = apply(
            &mut run,
            RunEvent::Aborted {
                failure: RunFailure::ExecutionFailure { message: "late".into() },
                usage: RunUsage::default(),
                cost_cents: 0,
            },
        );
        assert!(second.is_err());
        assert_eq!(run.cost_cents, 1);
    }
}
