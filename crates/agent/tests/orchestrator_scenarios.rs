use std::sync::Arc;
use std::time::Duration;

use agis_agent::{
    AgentInvocation, AgentLogic, AgentOutput, EchoLogic, LogicRegistry, RunOrchestrator,
};
use agis_core::{
    AgentConfig, AuditCategory, AuditOutcome, BudgetConfig, CancelReason, CancellationToken,
    ConnectorCredentials, ConnectorDirectory, ConnectorType, ExecutionContext,
    InMemoryAuditSink, InMemoryBudgetLedger, InMemoryCredentialVault, InMemoryRunSink,
    JsonMap, PiiRedactionConfig, Run, RunStatus, RunUsage, ScopeConfig, TenantAllowance,
    TenantId,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

struct MeteredLogic {
    calls: u64,
    tokens: u64,
}

#[async_trait]
impl AgentLogic for MeteredLogic {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentOutput> {
        for _ in 0..self.calls {
            invocation.meter.begin_tool_call("mcp__github__get_pull_request")?;
        }
        invocation.meter.record_tokens(self.tokens)?;

        let mut outputs = JsonMap::new();
        outputs.insert("reviewed".to_string(), json!(true));
        Ok(AgentOutput::new(outputs))
    }
}

struct FailingLogic;

#[async_trait]
impl AgentLogic for FailingLogic {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentOutput> {
        invocation.meter.begin_tool_call("mcp__github__get_pull_request")?;
        anyhow::bail!("github returned 502 Bad Gateway")
    }
}

struct SlowLogic(Duration);

#[async_trait]
impl AgentLogic for SlowLogic {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentOutput> {
        tokio::time::sleep(self.0).await;
        Ok(AgentOutput::new(invocation.inputs))
    }
}

struct GatedLogic {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl AgentLogic for GatedLogic {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentOutput> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(AgentOutput::new(invocation.inputs))
    }
}

struct SelfReportingLogic(RunUsage);

#[async_trait]
impl AgentLogic for SelfReportingLogic {
    async fn invoke(&self, _invocation: AgentInvocation) -> Result<AgentOutput> {
        Ok(AgentOutput::default().with_usage(self.0))
    }
}

fn registry_with<T: AgentLogic + 'static>(agent_key: &str, logic: T) -> Arc<LogicRegistry> {
    let mut registry = LogicRegistry::default();
    registry.register(agent_key, logic);
    Arc::new(registry)
}

fn orchestrator(logics: Arc<LogicRegistry>) -> RunOrchestrator {
    RunOrchestrator::new(
        Arc::new(ConnectorDirectory::builtin()),
        Arc::new(InMemoryBudgetLedger::default()),
        logics,
    )
}

fn context(agent_key: &str, inputs: Value, config: AgentConfig) -> ExecutionContext {
    let inputs = match inputs {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    };
    ExecutionContext::new(agent_key, agent_key, "tenant-acme", inputs, config)
}

fn budget(max_cost_cents: Option<u64>, max_tool_calls: Option<u64>) -> AgentConfig {
    AgentConfig {
        budget: Some(BudgetConfig { max_cost_cents, max_tool_calls, max_duration_ms: None }),
        ..AgentConfig::default()
    }
}

fn assert_finalized(run: &Run) {
    assert_ne!(run.status, RunStatus::Running);
    assert_ne!(run.status, RunStatus::Queued);
    run.check_invariants().expect("finalized run is consistent");
}

#[tokio::test]
async fn missing_connector_fails_before_any_work() {
    let sink = Arc::new(InMemoryRunSink::default());
    let orchestrator =
        orchestrator(registry_with("docs-syncer", EchoLogic)).with_run_sink(sink.clone());

    let run = orchestrator
        .execute_agent(context("docs-syncer", json!({"repo": "acme/web"}), AgentConfig::default()))
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors, vec!["Missing connectors: notion".to_string()]);
    assert_eq!(run.cost_cents, 0);
    assert!(run.finished_at.is_some());
    assert!(run.inputs.is_none());
    assert_eq!(sink.runs().await.len(), 1);
}

#[tokio::test]
async fn approval_parks_run_without_cost() {
    let config = AgentConfig {
        scope: Some(ScopeConfig { requires_approval: true, ..ScopeConfig::default() }),
        ..AgentConfig::default()
    };
    let run = orchestrator(registry_with("pr-reviewer", MeteredLogic { calls: 5, tokens: 0 }))
        .execute_agent(context("pr-reviewer", json!({"pr": 42}), config))
        .await;

    assert_eq!(run.status, RunStatus::NeedsReview);
    assert_eq!(run.cost_cents, 0);
    assert!(run.finished_at.is_none());
    assert!(run.tool_calls.is_none());
    assert_eq!(run.inputs.as_ref().and_then(|inputs| inputs.get("pr")), Some(&json!(42)));
    run.check_invariants().expect("needs_review run is consistent");
}

#[tokio::test]
async fn metered_usage_is_priced_on_success() {
    let run = orchestrator(registry_with("pr-reviewer", MeteredLogic { calls: 3, tokens: 5_000 }))
        .execute_agent(context("pr-reviewer", json!({"pr": 7}), AgentConfig::default()))
        .await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.tool_calls, Some(3));
    assert_eq!(run.tokens_used, Some(5_000));
    assert_eq!(run.cost_cents, 4);
    assert!(run.errors.is_empty());
    assert_eq!(run.outputs.as_ref().and_then(|outputs| outputs.get("reviewed")), Some(&json!(true)));
    assert_finalized(&run);
}

#[tokio::test]
async fn tool_call_ceiling_stops_the_run() {
    let run = orchestrator(registry_with("pr-reviewer", MeteredLogic { calls: 5, tokens: 0 }))
        .execute_agent(context("pr-reviewer", json!({}), budget(None, Some(2))))
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors, vec!["Budget exceeded: tool call limit of 2 reached".to_string()]);
    assert_eq!(run.tool_calls, Some(2));
    assert_eq!(run.cost_cents, 2);
    assert_finalized(&run);
}

#[tokio::test]
async fn cost_ceiling_stops_the_run() {
    let run = orchestrator(registry_with("pr-reviewer", MeteredLogic { calls: 2, tokens: 20_000 }))
        .execute_agent(context("pr-reviewer", json!({}), budget(Some(3), None)))
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.errors,
        vec!["Budget exceeded: cost limit of 3 cents exceeded (projected 6 cents)".to_string()]
    );
    assert_eq!(run.usage(), RunUsage::new(2, 20_000));
    assert_eq!(run.cost_cents, 6);
}

#[tokio::test]
async fn self_reported_usage_over_the_ceiling_fails_the_run() {
    let run = orchestrator(registry_with("pr-reviewer", SelfReportingLogic(RunUsage::new(9, 0))))
        .execute_agent(context("pr-reviewer", json!({}), budget(None, Some(4))))
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors, vec!["Budget exceeded: reported 9 tool calls exceeds limit of 4".to_string()]);
    assert_eq!(run.cost_cents, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_runs_cannot_both_spend_the_tenant_allowance() {
    let ledger = Arc::new(InMemoryBudgetLedger::default());
    ledger
        .set_allowance(
            &TenantId("tenant-acme".to_string()),
            TenantAllowance { max_cost_cents: Some(100), ..TenantAllowance::default() },
        )
        .await;

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let orchestrator = Arc::new(RunOrchestrator::new(
        Arc::new(ConnectorDirectory::builtin()),
        ledger.clone(),
        registry_with(
            "pr-reviewer",
            GatedLogic { entered: entered.clone(), release: release.clone() },
        ),
    ));

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute_agent(context("pr-reviewer", json!({}), budget(Some(100), None)))
                .await
        })
    };
    entered.notified().await;

    let second = orchestrator
        .execute_agent(context("pr-reviewer", json!({}), budget(Some(100), None)))
        .await;
    assert_eq!(second.status, RunStatus::Failed);
    assert!(second.errors[0].starts_with("Budget exceeded: tenant cost allowance of 100 cents"));

    release.notify_one();
    let first = first.await.expect("first run task");
    assert_eq!(first.status, RunStatus::Succeeded);

    let usage = ledger.usage(&TenantId("tenant-acme".to_string())).await;
    assert_eq!(usage.open_reservations, 0);
    assert_eq!(usage.committed.cost_cents, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_burst_admits_at_most_one_run() {
    let ledger = Arc::new(InMemoryBudgetLedger::default());
    ledger
        .set_allowance(
            &TenantId("tenant-acme".to_string()),
            TenantAllowance { max_cost_cents: Some(50), ..TenantAllowance::default() },
        )
        .await;
    let orchestrator = Arc::new(RunOrchestrator::new(
        Arc::new(ConnectorDirectory::builtin()),
        ledger,
        registry_with("pr-reviewer", SlowLogic(Duration::from_millis(300))),
    ));

    let handles = (0..8)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .execute_agent(context("pr-reviewer", json!({}), budget(Some(50), None)))
                    .await
            })
        })
        .collect::<Vec<_>>();

    let mut runs = Vec::new();
    for handle in handles {
        runs.push(handle.await.expect("run task"));
    }

    let succeeded = runs.iter().filter(|run| run.status == RunStatus::Succeeded).count();
    assert!(succeeded <= 1, "{succeeded} runs were admitted against one allowance");
    for run in runs.iter().filter(|run| run.status == RunStatus::Failed) {
        assert!(run.errors[0].starts_with("Budget exceeded: tenant cost allowance"));
        assert_eq!(run.cost_cents, 0);
    }
}

#[tokio::test]
async fn duration_ceiling_times_out_slow_logic() {
    let config = AgentConfig {
        budget: Some(BudgetConfig { max_duration_ms: Some(50), ..BudgetConfig::default() }),
        ..AgentConfig::default()
    };
    let run = orchestrator(registry_with("pr-reviewer", SlowLogic(Duration::from_secs(5))))
        .execute_agent(context("pr-reviewer", json!({}), config))
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors, vec!["Budget exceeded: run exceeded max duration of 50 ms".to_string()]);
    assert_eq!(run.cost_cents, 0);
    assert_finalized(&run);
}

#[tokio::test]
async fn operator_ceiling_applies_when_tenant_sets_none() {
    let run = orchestrator(registry_with("pr-reviewer", SlowLogic(Duration::from_secs(5))))
        .with_settings(agis_agent::OrchestratorSettings {
            max_duration_ms: Some(30),
            actor: "scheduler".to_string(),
        })
        .execute_agent(context("pr-reviewer", json!({}), AgentConfig::default()))
        .await;

    assert_eq!(run.errors, vec!["Budget exceeded: run exceeded max duration of 30 ms".to_string()]);
}

#[tokio::test]
async fn external_cancellation_is_not_a_budget_failure() {
    let orchestrator = orchestrator(registry_with("pr-reviewer", SlowLogic(Duration::from_secs(5))));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel(CancelReason::External { reason: "operator requested stop".to_string() });
    });

    let run = orchestrator
        .execute_agent_with_cancel(context("pr-reviewer", json!({}), AgentConfig::default()), cancel)
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors, vec!["Run cancelled: operator requested stop".to_string()]);
}

#[tokio::test]
async fn logic_error_is_recorded_verbatim_with_partial_cost() {
    let run = orchestrator(registry_with("pr-reviewer", FailingLogic))
        .execute_agent(context("pr-reviewer", json!({}), AgentConfig::default()))
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors, vec!["github returned 502 Bad Gateway".to_string()]);
    assert_eq!(run.tool_calls, Some(1));
    assert_eq!(run.cost_cents, 1);
}

#[tokio::test]
async fn unregistered_logic_fails_the_run() {
    let run = orchestrator(Arc::new(LogicRegistry::default()))
        .execute_agent(context("pr-reviewer", json!({}), AgentConfig::default()))
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors, vec!["No agent logic registered for `pr-reviewer`".to_string()]);
}

#[tokio::test]
async fn inputs_are_redacted_before_logic_sees_them() {
    let config = AgentConfig {
        pii_redaction: Some(PiiRedactionConfig { enabled: true, patterns: None }),
        ..AgentConfig::default()
    };
    let run = orchestrator(registry_with("pr-reviewer", EchoLogic))
        .execute_agent(context(
            "pr-reviewer",
            json!({"note": "contact jane@acme.io", "pr": 12}),
            config,
        ))
        .await;

    assert_eq!(run.status, RunStatus::Succeeded);
    let expected = json!({"note": "contact [REDACTED]", "pr": 12});
    assert_eq!(run.inputs.map(Value::Object), Some(expected.clone()));
    assert_eq!(run.outputs.map(Value::Object), Some(expected));
}

#[tokio::test]
async fn invalid_redaction_pattern_releases_the_reservation() {
    let ledger = Arc::new(InMemoryBudgetLedger::default());
    let orchestrator = RunOrchestrator::new(
        Arc::new(ConnectorDirectory::builtin()),
        ledger.clone(),
        registry_with("pr-reviewer", EchoLogic),
    );
    let config = AgentConfig {
        budget: Some(BudgetConfig { max_cost_cents: Some(10), ..BudgetConfig::default() }),
        pii_redaction: Some(PiiRedactionConfig {
            enabled: true,
            patterns: Some(vec!["(unclosed".to_string()]),
        }),
        ..AgentConfig::default()
    };

    let run = orchestrator.execute_agent(context("pr-reviewer", json!({}), config)).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.errors[0].starts_with("Configuration error: invalid PII pattern `(unclosed`"));
    let usage = ledger.usage(&TenantId("tenant-acme".to_string())).await;
    assert_eq!(usage.open_reservations, 0);
    assert_eq!(usage.committed.cost_cents, 0);
}

#[tokio::test]
async fn budget_gate_runs_before_configuration_checks() {
    let ledger = Arc::new(InMemoryBudgetLedger::default());
    ledger
        .set_allowance(
            &TenantId("tenant-acme".to_string()),
            TenantAllowance { max_cost_cents: Some(5), ..TenantAllowance::default() },
        )
        .await;
    let orchestrator = RunOrchestrator::new(
        Arc::new(ConnectorDirectory::builtin()),
        ledger,
        Arc::new(LogicRegistry::default()),
    );
    let config = AgentConfig {
        budget: Some(BudgetConfig { max_cost_cents: Some(10), ..BudgetConfig::default() }),
        pii_redaction: Some(PiiRedactionConfig {
            enabled: true,
            patterns: Some(vec!["(unclosed".to_string()]),
        }),
        ..AgentConfig::default()
    };

    let run = orchestrator.execute_agent(context("pr-reviewer", json!({}), config)).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors.len(), 1);
    assert!(run.errors[0].starts_with("Budget exceeded: tenant cost allowance of 5 cents"));
}

#[tokio::test]
async fn uncapped_cost_is_held_to_the_remaining_tenant_allowance() {
    let ledger = Arc::new(InMemoryBudgetLedger::default());
    let tenant = TenantId("tenant-acme".to_string());
    ledger
        .set_allowance(&tenant, TenantAllowance { max_cost_cents: Some(5), ..TenantAllowance::default() })
        .await;
    let orchestrator = RunOrchestrator::new(
        Arc::new(ConnectorDirectory::builtin()),
        ledger.clone(),
        registry_with("pr-reviewer", MeteredLogic { calls: 50, tokens: 0 }),
    );

    let run = orchestrator
        .execute_agent(context("pr-reviewer", json!({}), budget(None, Some(100))))
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.errors,
        vec!["Budget exceeded: cost limit of 5 cents exceeded (projected 6 cents)".to_string()]
    );
    assert_eq!(run.tool_calls, Some(5));
    assert_eq!(run.cost_cents, 5);

    let usage = ledger.usage(&tenant).await;
    assert_eq!(usage.committed.cost_cents, 5);
    assert_eq!(usage.open_reservations, 0);

    let next = orchestrator
        .execute_agent(context("pr-reviewer", json!({}), AgentConfig::default()))
        .await;
    assert_eq!(next.status, RunStatus::Failed);
    assert_eq!(
        next.errors,
        vec![
            "Budget exceeded: tenant cost allowance of 5 cents exhausted \
             (5 cents committed or reserved)"
                .to_string()
        ]
    );
    assert_eq!(next.cost_cents, 0);
}

#[tokio::test]
async fn credential_gate_reports_missing_keys() {
    let vault = Arc::new(InMemoryCredentialVault::default());
    let orchestrator =
        orchestrator(registry_with("pr-reviewer", EchoLogic)).with_credential_vault(vault.clone());

    let run = orchestrator
        .execute_agent(context("pr-reviewer", json!({}), AgentConfig::default()))
        .await;
    assert_eq!(run.errors, vec!["Missing credentials: github (GITHUB_TOKEN)".to_string()]);

    vault.store(
        ConnectorCredentials::new(TenantId("tenant-acme".to_string()), ConnectorType::Github)
            .with_secret("GITHUB_TOKEN", "ghp_test"),
    );
    let run = orchestrator
        .execute_agent(context("pr-reviewer", json!({}), AgentConfig::default()))
        .await;
    assert_eq!(run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn audit_trail_follows_the_run() {
    let audit = InMemoryAuditSink::default();
    let run = orchestrator(registry_with("pr-reviewer", MeteredLogic { calls: 1, tokens: 0 }))
        .with_audit_sink(Arc::new(audit.clone()))
        .execute_agent(context("pr-reviewer", json!({}), AgentConfig::default()))
        .await;

    let events = audit.events();
    assert_eq!(events[0].event_type, "run.intake");
    assert_eq!(events[0].category, AuditCategory::Intake);

    let transitions = events
        .iter()
        .filter(|event| event.event_type == "run.transition")
        .map(|event| (event.metadata["from"].as_str(), event.metadata["to"].as_str()))
        .collect::<Vec<_>>();
    assert_eq!(transitions, vec![("queued", "running"), ("running", "succeeded")]);
    assert!(events.iter().all(|event| event.correlation_id == run.id.0));
    assert!(events.iter().all(|event| event.outcome == AuditOutcome::Success));
}
