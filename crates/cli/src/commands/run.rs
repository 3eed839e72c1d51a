use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agis_agent::{EchoLogic, LogicRegistry, RunOrchestrator};
use agis_core::audit::InMemoryAuditSink;
use agis_core::budget::InMemoryBudgetLedger;
use agis_core::config::{AppConfig, LoadOptions};
use agis_core::connectors::ConnectorDirectory;
use agis_core::domain::run::{AgentConfig, ExecutionContext, JsonMap, Run, RunStatus};
use agis_db::{connect_with_config, migrations, SqlAuditLogRepository, SqlRunRepository};
use tracing::{info, warn};

use crate::commands::{load_config, load_directory, runtime, CommandResult};

#[derive(Clone, Debug)]
pub struct RunArgs {
    pub agent_key: String,
    pub tenant_id: String,
    /// JSON object handed to the agent as its inputs.
    pub inputs: Option<String>,
    /// TOML file holding the tenant's agent configuration.
    pub agent_config: Option<PathBuf>,
    pub persist: bool,
}

pub fn run(options: &LoadOptions, args: &RunArgs) -> CommandResult {
    let config = match load_config("run", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let directory = match load_directory("run", &config) {
        Ok(directory) => directory,
        Err(result) => return result,
    };

    let inputs = match parse_inputs(args.inputs.as_deref()) {
        Ok(inputs) => inputs,
        Err(message) => return CommandResult::failure("run", "invalid_inputs", message, 2),
    };
    let agent_config = match read_agent_config(args.agent_config.as_deref()) {
        Ok(agent_config) => agent_config,
        Err(message) => return CommandResult::failure("run", "invalid_agent_config", message, 2),
    };

    let agent_name = directory
        .agent(&args.agent_key)
        .map(|agent| agent.name.clone())
        .unwrap_or_else(|| args.agent_key.clone());
    let context =
        ExecutionContext::new(&args.agent_key, agent_name, &args.tenant_id, inputs, agent_config);

    let runtime = match runtime("run") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    match runtime.block_on(execute(&config, directory, context, args.persist)) {
        Ok(run) => {
            let exit_code = if run.status == RunStatus::Failed { 1 } else { 0 };
            CommandResult::document("run", &run, exit_code)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("run", error_class, message, exit_code)
        }
    }
}

async fn execute(
    config: &AppConfig,
    directory: ConnectorDirectory,
    context: ExecutionContext,
    persist: bool,
) -> Result<Run, (&'static str, String, u8)> {
    let audit = InMemoryAuditSink::default();
    let logics = LogicRegistry::default().with_fallback(EchoLogic);
    let mut orchestrator = RunOrchestrator::from_config(
        config,
        Arc::new(directory),
        Arc::new(InMemoryBudgetLedger::default()),
        Arc::new(logics),
    )
    .with_audit_sink(Arc::new(audit.clone()));

    let pool = if persist {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        orchestrator = orchestrator.with_run_sink(Arc::new(SqlRunRepository::new(pool.clone())));
        Some(pool)
    } else {
        None
    };

    let run = orchestrator.execute_agent(context).await;
    info!(
        event_name = "cli.run.finished",
        run_id = %run.id,
        status = run.status.as_str(),
        cost_cents = run.cost_cents,
        "agent run finished"
    );

    if let Some(pool) = pool {
        let events = audit.take();
        if let Err(error) = SqlAuditLogRepository::new(pool.clone()).append_all(&events).await {
            warn!(
                event_name = "cli.run.audit_persist_failed",
                run_id = %run.id,
                error = %error,
                "audit events could not be stored"
            );
        }
        pool.close().await;
    }

    Ok(run)
}

fn parse_inputs(raw: Option<&str>) -> Result<JsonMap, String> {
    match raw {
        None => Ok(JsonMap::new()),
        Some(raw) => serde_json::from_str::<JsonMap>(raw)
            .map_err(|error| format!("inputs must be a JSON object: {error}")),
    }
}

fn read_agent_config(path: Option<&Path>) -> Result<AgentConfig, String> {
    let Some(path) = path else {
        return Ok(AgentConfig::default());
    };

    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read `{}`: {error}", path.display()))?;
    toml::from_str::<AgentConfig>(&raw)
        .map_err(|error| format!("could not parse `{}`: {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::{parse_inputs, read_agent_config};

    #[test]
    fn inputs_must_be_an_object() {
        assert_eq!(parse_inputs(None).expect("empty"), serde_json::Map::new());
        let inputs = parse_inputs(Some(r#"{"pr": 42}"#)).expect("object");
        assert_eq!(inputs.get("pr"), Some(&json!(42)));

        let error = parse_inputs(Some("[1, 2]")).expect_err("array is not an object");
        assert!(error.starts_with("inputs must be a JSON object"));
    }

    #[test]
    fn agent_config_reads_budget_scope_and_redaction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.toml");
        fs::write(
            &path,
            r#"
[budget]
max_cost_cents = 25
max_tool_calls = 10

[scope]
denied_actions = ["mcp__github__delete_repo"]
requires_approval = true

[pii_redaction]
enabled = true
patterns = ["email", "ticket-\\d+"]
"#,
        )
        .expect("write agent config");

        let config = read_agent_config(Some(&path)).expect("parse");
        let budget = config.budget.as_ref().expect("budget");
        assert_eq!(budget.max_cost_cents, Some(25));
        assert_eq!(budget.max_tool_calls, Some(10));
        assert_eq!(budget.max_duration_ms, None);
        assert!(config.requires_approval());
        assert!(config.pii_redaction_enabled());
    }
}
