//! Run orchestration.
//!
//! `RunOrchestrator::execute_agent` takes one execution request through the gates in
//! order: connectors, credentials, budget, logic resolution, redaction, approval. It invokes
//! the agent logic under the ceilings the ledger granted and returns exactly one finalized
//! [`Run`]. A rejection after the budget gate releases the reservation unspent. Every failure
//! is recorded on the run; nothing escapes as an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agis_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use agis_core::budget::{BudgetAmounts, BudgetCharge, BudgetLedger, ChargeDecision, Reservation};
use agis_core::cancel::{CancelReason, CancellationToken};
use agis_core::config::AppConfig;
use agis_core::connectors::{ConnectorDirectory, CredentialVault};
use agis_core::cost::{CostModel, DeterministicCostModel};
use agis_core::domain::run::{BudgetConfig, ExecutionContext, Run, RunStatus, RunUsage};
use agis_core::errors::RunFailure;
use agis_core::pii::PiiRedactor;
use agis_core::records::RunSink;
use agis_core::run_state::{self, RunEvent};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::guardrails::ActionPolicy;
use crate::logic::{AgentInvocation, AgentLogic, AgentOutput};
use crate::meter::UsageMeter;
use crate::registry::LogicRegistry;

pub const DEFAULT_ACTOR: &str = "orchestrator";

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// Applied when the tenant configuration sets no `max_duration_ms`.
    pub max_duration_ms: Option<u64>,
    pub actor: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { max_duration_ms: None, actor: DEFAULT_ACTOR.to_string() }
    }
}

struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

enum Invocation {
    Finished(anyhow::Result<AgentOutput>),
    Interrupted(CancelReason),
    TimedOut(u64),
}

pub struct RunOrchestrator {
    directory: Arc<ConnectorDirectory>,
    ledger: Arc<dyn BudgetLedger>,
    logics: Arc<LogicRegistry>,
    cost_model: Arc<dyn CostModel>,
    audit: Arc<dyn AuditSink>,
    run_sink: Option<Arc<dyn RunSink>>,
    vault: Option<Arc<dyn CredentialVault>>,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("logics", &self.logics)
            .field("settings", &self.settings)
            .field("has_run_sink", &self.run_sink.is_some())
            .field("has_vault", &self.vault.is_some())
            .finish_non_exhaustive()
    }
}

impl RunOrchestrator {
    pub fn new(
        directory: Arc<ConnectorDirectory>,
        ledger: Arc<dyn BudgetLedger>,
        logics: Arc<LogicRegistry>,
    ) -> Self {
        Self {
            directory,
            ledger,
            logics,
            cost_model: Arc::new(DeterministicCostModel::default()),
            audit: Arc::new(NoopAuditSink),
            run_sink: None,
            vault: None,
            settings: OrchestratorSettings::default(),
        }
    }

    /// Applies the operator settings from `config`: pricing rates, duration ceiling, actor.
    pub fn from_config(
        config: &AppConfig,
        directory: Arc<ConnectorDirectory>,
        ledger: Arc<dyn BudgetLedger>,
        logics: Arc<LogicRegistry>,
    ) -> Self {
        Self::new(directory, ledger, logics)
            .with_cost_model(Arc::new(DeterministicCostModel::new(config.pricing.rates())))
            .with_settings(OrchestratorSettings {
                max_duration_ms: config.execution.max_duration_ms,
                actor: config.execution.actor.clone(),
            })
    }

    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_run_sink(mut self, run_sink: Arc<dyn RunSink>) -> Self {
        self.run_sink = Some(run_sink);
        self
    }

    pub fn with_credential_vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn directory(&self) -> &ConnectorDirectory {
        &self.directory
    }

    pub async fn execute_agent(&self, context: ExecutionContext) -> Run {
        self.execute_agent_with_cancel(context, CancellationToken::new()).await
    }

    /// Like [`Self::execute_agent`], but `cancel` lets the caller stop the run from outside.
    pub async fn execute_agent_with_cancel(
        &self,
        context: ExecutionContext,
        cancel: CancellationToken,
    ) -> Run {
        let started = Instant::now();
        let audit = AuditContext::for_run(&context, self.settings.actor.as_str());
        let mut run = Run::queued(&context);

        info!(
            event_name = "run.intake",
            run_id = %run.id,
            tenant_id = %run.tenant_id,
            agent_key = %run.agent_key,
            correlation_id = %audit.correlation_id,
            "run accepted"
        );
        self.audit.emit(audit.event("run.intake", AuditCategory::Intake, AuditOutcome::Success));

        let reservation = self.process(&context, &mut run, &audit, cancel).await;

        if let Some(reservation) = reservation {
            let actual = consumed(&run, started.elapsed());
            self.settle(&run, &audit, &reservation, actual).await;
        }
        self.record(&run, &audit).await;

        run
    }

    async fn process(
        &self,
        context: &ExecutionContext,
        run: &mut Run,
        audit: &AuditContext,
        cancel: CancellationToken,
    ) -> Option<Reservation> {
        let agent_key = context.agent_key.as_str();

        let missing = self.directory.missing_connectors(agent_key);
        if !missing.is_empty() {
            self.reject(run, audit, AuditCategory::Connector, RunFailure::ConnectorUnavailable {
                missing,
            });
            return None;
        }

        if let Some(vault) = &self.vault {
            let gaps = self.directory.missing_credentials(
                agent_key,
                &context.tenant_id,
                vault.as_ref(),
                Utc::now(),
            );
            if !gaps.is_empty() {
                self.reject(run, audit, AuditCategory::Connector, RunFailure::CredentialsMissing {
                    gaps,
                });
                return None;
            }
        }

        let charge = BudgetCharge {
            tenant_id: context.tenant_id.clone(),
            run_id: context.run_id.clone(),
            caps: self.effective_caps(context.config.budget.as_ref()),
        };
        let requested = charge.caps.clone();
        let reservation = match self.ledger.try_charge(charge).await {
            Ok(ChargeDecision::Allowed { reservation }) => {
                self.audit.emit(
                    audit
                        .event("run.budget.reserved", AuditCategory::Budget, AuditOutcome::Success)
                        .with_metadata("reservation_id", reservation.reservation_id.as_str())
                        .with_metadata("cost_cents", reservation.amounts.cost_cents.to_string()),
                );
                reservation
            }
            Ok(ChargeDecision::Denied { reason }) => {
                self.reject(run, audit, AuditCategory::Budget, RunFailure::BudgetExceeded {
                    detail: reason,
                });
                return None;
            }
            Err(error) => {
                self.reject(run, audit, AuditCategory::Budget, RunFailure::LedgerUnavailable {
                    message: error.to_string(),
                });
                return None;
            }
        };
        let caps = tightest(&requested, &reservation.caps);

        let Some(logic) = self.logics.resolve(agent_key) else {
            self.reject(run, audit, AuditCategory::Execution, RunFailure::LogicUnavailable {
                agent_key: context.agent_key.clone(),
            });
            self.settle(run, audit, &reservation, BudgetAmounts::default()).await;
            return None;
        };

        let redactor = match context.config.pii_redaction.as_ref().filter(|pii| pii.enabled) {
            Some(pii) => match PiiRedactor::from_patterns(pii.patterns.as_deref()) {
                Ok(redactor) => Some(redactor),
                Err(error) => {
                    self.reject(run, audit, AuditCategory::Privacy, RunFailure::Configuration {
                        message: error.to_string(),
                    });
                    self.settle(run, audit, &reservation, BudgetAmounts::default()).await;
                    return None;
                }
            },
            None => None,
        };

        let inputs = match &redactor {
            Some(redactor) => {
                let sanitized = redactor.redact(&context.inputs);
                self.audit.emit(audit.event(
                    "run.inputs.redacted",
                    AuditCategory::Privacy,
                    AuditOutcome::Success,
                ));
                sanitized
            }
            None => context.inputs.clone(),
        };

        if context.config.requires_approval() {
            self.transition(
                run,
                audit,
                AuditCategory::Approval,
                AuditOutcome::Success,
                RunEvent::ApprovalRequired { inputs },
            );
            return Some(reservation);
        }

        self.transition(
            run,
            audit,
            AuditCategory::Execution,
            AuditOutcome::Success,
            RunEvent::Started { inputs: inputs.clone() },
        );

        let meter = UsageMeter::new(
            caps.clone(),
            ActionPolicy::from_scope(context.config.scope.as_ref()),
            Arc::clone(&self.cost_model),
            cancel.clone(),
        );
        let invocation = AgentInvocation {
            agent_key: context.agent_key.clone(),
            tenant_id: context.tenant_id.clone(),
            run_id: context.run_id.clone(),
            inputs,
            caps: caps.clone(),
            meter: meter.clone(),
        };

        let outcome = invoke_with_limits(logic, invocation, &cancel, caps.max_duration_ms).await;
        if let Invocation::TimedOut(max_duration_ms) = &outcome {
            cancel.cancel(CancelReason::Timeout { max_duration_ms: *max_duration_ms });
        }

        let event = match outcome {
            Invocation::Finished(Ok(output)) => {
                let usage = meter.usage().merge_max(output.usage);
                match self.cost_model.cost_cents(usage) {
                    Ok(cost_cents) => match ceiling_breach(&caps, usage, cost_cents) {
                        Some(detail) => RunEvent::Aborted {
                            failure: RunFailure::BudgetExceeded { detail },
                            usage,
                            cost_cents,
                        },
                        None => RunEvent::Completed { outputs: output.outputs, usage, cost_cents },
                    },
                    Err(error) => RunEvent::Aborted {
                        failure: RunFailure::ExecutionFailure {
                            message: format!("cost computation failed: {error}"),
                        },
                        usage,
                        cost_cents: 0,
                    },
                }
            }
            Invocation::Finished(Err(error)) => {
                let failure = match cancel.reason() {
                    Some(reason) => failure_for(reason),
                    None => RunFailure::ExecutionFailure { message: format!("{error:#}") },
                };
                self.aborted(failure, meter.usage())
            }
            Invocation::Interrupted(reason) => self.aborted(failure_for(reason), meter.usage()),
            Invocation::TimedOut(max_duration_ms) => {
                let reason =
                    cancel.reason().unwrap_or(CancelReason::Timeout { max_duration_ms });
                self.aborted(failure_for(reason), meter.usage())
            }
        };

        let outcome = match event {
            RunEvent::Completed { .. } => AuditOutcome::Success,
            _ => AuditOutcome::Failed,
        };
        self.transition(run, audit, AuditCategory::Execution, outcome, event);

        Some(reservation)
    }

    fn effective_caps(&self, budget: Option<&BudgetConfig>) -> BudgetConfig {
        let mut caps = budget.cloned().unwrap_or_default();
        if caps.max_duration_ms.is_none() {
            caps.max_duration_ms = self.settings.max_duration_ms;
        }
        caps
    }

    /// Partial usage is still priced; an unpriceable run is recorded at zero.
    fn aborted(&self, failure: RunFailure, usage: RunUsage) -> RunEvent {
        let cost_cents = match self.cost_model.cost_cents(usage) {
            Ok(cost_cents) => cost_cents,
            Err(error) => {
                warn!(
                    event_name = "run.cost.unpriceable",
                    error = %error,
                    tool_calls = usage.tool_calls,
                    tokens_used = usage.tokens_used,
                    "could not price partial usage"
                );
                0
            }
        };
        RunEvent::Aborted { failure, usage, cost_cents }
    }

    fn reject(
        &self,
        run: &mut Run,
        audit: &AuditContext,
        category: AuditCategory,
        failure: RunFailure,
    ) {
        warn!(
            event_name = "run.rejected",
            run_id = %run.id,
            tenant_id = %run.tenant_id,
            agent_key = %run.agent_key,
            correlation_id = %audit.correlation_id,
            error_class = failure.error_class(),
            reason = %failure,
            "run rejected before start"
        );
        self.transition(run, audit, category, AuditOutcome::Rejected, RunEvent::Rejected { failure });
    }

    fn transition(
        &self,
        run: &mut Run,
        audit: &AuditContext,
        category: AuditCategory,
        outcome: AuditOutcome,
        event: RunEvent,
    ) {
        let event_name = event.name();
        match run_state::apply(run, event) {
            Ok(transition) => {
                info!(
                    event_name = "run.transition",
                    run_id = %run.id,
                    tenant_id = %run.tenant_id,
                    agent_key = %run.agent_key,
                    correlation_id = %audit.correlation_id,
                    from = transition.from.as_str(),
                    to = transition.to.as_str(),
                    cost_cents = run.cost_cents,
                    "run transitioned"
                );
                self.audit.emit(
                    audit
                        .event("run.transition", category, outcome)
                        .with_metadata("event", transition.event)
                        .with_metadata("from", transition.from.as_str())
                        .with_metadata("to", transition.to.as_str())
                        .with_metadata("reason", transition.reason)
                        .with_metadata("cost_cents", run.cost_cents.to_string()),
                );
            }
            Err(error) => {
                error!(
                    event_name = "run.transition.invalid",
                    run_id = %run.id,
                    correlation_id = %audit.correlation_id,
                    event = event_name,
                    error = %error,
                    "run transition rejected"
                );
                self.audit.emit(
                    audit
                        .event("run.transition.invalid", category, AuditOutcome::Failed)
                        .with_metadata("event", event_name)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
    }

    async fn settle(
        &self,
        run: &Run,
        audit: &AuditContext,
        reservation: &Reservation,
        actual: BudgetAmounts,
    ) {
        match self.ledger.settle(reservation, actual).await {
            Ok(()) => self.audit.emit(
                audit
                    .event("run.budget.settled", AuditCategory::Budget, AuditOutcome::Success)
                    .with_metadata("reservation_id", reservation.reservation_id.as_str())
                    .with_metadata("cost_cents", actual.cost_cents.to_string()),
            ),
            Err(error) => {
                warn!(
                    event_name = "run.budget.settle_failed",
                    run_id = %run.id,
                    tenant_id = %run.tenant_id,
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "budget reservation could not be settled"
                );
                self.audit.emit(
                    audit
                        .event("run.budget.settle_failed", AuditCategory::Budget, AuditOutcome::Failed)
                        .with_metadata("reservation_id", reservation.reservation_id.as_str())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
    }

    async fn record(&self, run: &Run, audit: &AuditContext) {
        let Some(sink) = &self.run_sink else {
            return;
        };

        match sink.record(run).await {
            Ok(()) => self.audit.emit(audit.event(
                "run.recorded",
                AuditCategory::Persistence,
                AuditOutcome::Success,
            )),
            Err(error) => {
                warn!(
                    event_name = "run.record_failed",
                    run_id = %run.id,
                    tenant_id = %run.tenant_id,
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "finalized run could not be recorded"
                );
                self.audit.emit(
                    audit
                        .event("run.record_failed", AuditCategory::Persistence, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
    }
}

async fn invoke_with_limits(
    logic: Arc<dyn AgentLogic>,
    invocation: AgentInvocation,
    cancel: &CancellationToken,
    max_duration_ms: Option<u64>,
) -> Invocation {
    let deadline = async {
        match max_duration_ms {
            Some(max_duration_ms) => {
                tokio::time::sleep(Duration::from_millis(max_duration_ms)).await;
                max_duration_ms
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        reason = cancel.cancelled() => Invocation::Interrupted(reason),
        result = logic.invoke(invocation) => Invocation::Finished(result),
        max_duration_ms = deadline => Invocation::TimedOut(max_duration_ms),
    }
}

fn consumed(run: &Run, elapsed: Duration) -> BudgetAmounts {
    // A run parked for review consumed nothing yet.
    if run.status == RunStatus::NeedsReview {
        return BudgetAmounts::default();
    }
    BudgetAmounts {
        cost_cents: run.cost_cents,
        tool_calls: run.tool_calls.unwrap_or(0),
        duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}

/// The lower of the run's own ceilings and those granted by the ledger, per dimension.
fn tightest(requested: &BudgetConfig, granted: &BudgetConfig) -> BudgetConfig {
    let lower = |a: Option<u64>, b: Option<u64>| match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    BudgetConfig {
        max_cost_cents: lower(requested.max_cost_cents, granted.max_cost_cents),
        max_duration_ms: lower(requested.max_duration_ms, granted.max_duration_ms),
        max_tool_calls: lower(requested.max_tool_calls, granted.max_tool_calls),
    }
}

fn failure_for(reason: CancelReason) -> RunFailure {
    if reason.is_budget_breach() {
        RunFailure::BudgetExceeded { detail: reason.to_string() }
    } else {
        RunFailure::Cancelled { reason: reason.to_string() }
    }
}

/// Ceilings checked against the final, possibly self-reported, usage.
fn ceiling_breach(caps: &BudgetConfig, usage: RunUsage, cost_cents: u64) -> Option<String> {
    if let Some(max_tool_calls) = caps.max_tool_calls {
        if usage.tool_calls > max_tool_calls {
            return Some(format!(
                "reported {} tool calls exceeds limit of {max_tool_calls}",
                usage.tool_calls
            ));
        }
    }
    if let Some(max_cost_cents) = caps.max_cost_cents {
        if cost_cents > max_cost_cents {
            return Some(format!(
                "run cost of {cost_cents} cents exceeds limit of {max_cost_cents} cents"
            ));
        }
    }
    None
}
