use agis_core::config::LoadOptions;
use agis_core::connectors::{ConnectorDirectory, ReadinessSummary};
use agis_core::domain::connector::ConnectorType;
use serde::Serialize;

use crate::commands::{load_config, load_directory, CommandResult};

#[derive(Debug, Serialize)]
struct AgentReadiness {
    agent_key: String,
    known: bool,
    fully_supported: bool,
    available_connectors: Vec<ConnectorType>,
    missing_connectors: Vec<ConnectorType>,
}

pub fn run(options: &LoadOptions, agent_key: Option<&str>, json_output: bool) -> CommandResult {
    let config = match load_config("readiness", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let directory = match load_directory("readiness", &config) {
        Ok(directory) => directory,
        Err(result) => return result,
    };

    match agent_key {
        Some(agent_key) => {
            let report = agent_readiness(&directory, agent_key);
            if !report.known {
                return CommandResult::failure(
                    "readiness",
                    "unknown_agent",
                    format!("agent `{agent_key}` is not in the catalog"),
                    1,
                );
            }
            if json_output {
                CommandResult::document("readiness", &report, 0)
            } else {
                CommandResult::text(render_agent(&report))
            }
        }
        None => {
            let summary = directory.readiness_summary();
            if json_output {
                CommandResult::document("readiness", &summary, 0)
            } else {
                CommandResult::text(render_summary(&summary))
            }
        }
    }
}

fn agent_readiness(directory: &ConnectorDirectory, agent_key: &str) -> AgentReadiness {
    let missing_connectors = directory.missing_connectors(agent_key);
    let available_connectors = directory
        .connectors_for(agent_key)
        .into_iter()
        .filter(|connector| connector.available)
        .map(|connector| connector.connector_type)
        .collect();

    AgentReadiness {
        agent_key: agent_key.to_string(),
        known: directory.is_known_agent(agent_key),
        fully_supported: directory.is_fully_supported(agent_key),
        available_connectors,
        missing_connectors,
    }
}

fn render_summary(summary: &ReadinessSummary) -> String {
    let mut lines = vec![format!(
        "{} of {} agents fully supported, {} waiting on connectors",
        summary.fully_supported, summary.total, summary.partially_supported
    )];
    if !summary.pending.is_empty() {
        let pending = summary.pending.iter().map(|key| key.as_str()).collect::<Vec<_>>();
        lines.push(format!("pending: {}", pending.join(", ")));
    }
    lines.join("\n")
}

fn render_agent(report: &AgentReadiness) -> String {
    let join = |connectors: &[ConnectorType]| {
        if connectors.is_empty() {
            "<none>".to_string()
        } else {
            connectors.iter().map(ConnectorType::as_str).collect::<Vec<_>>().join(", ")
        }
    };

    [
        format!(
            "{}: {}",
            report.agent_key,
            if report.fully_supported { "ready" } else { "pending" }
        ),
        format!("- available: {}", join(&report.available_connectors)),
        format!("- missing: {}", join(&report.missing_connectors)),
    ]
    .join("\n")
}
