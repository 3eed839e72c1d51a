use agis_core::config::LoadOptions;
use agis_core::connectors::ConnectorDirectory;
use agis_core::domain::connector::ConnectorType;
use serde::Serialize;

use crate::commands::{load_config, load_directory, CommandResult};

#[derive(Debug, Serialize)]
struct AgentEntry<'a> {
    key: &'a str,
    name: &'a str,
    category: &'static str,
    required_connectors: Vec<ConnectorType>,
    missing_connectors: Vec<ConnectorType>,
    ready: bool,
}

pub fn run(options: &LoadOptions, category: Option<&str>, json_output: bool) -> CommandResult {
    let config = match load_config("agents", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let directory = match load_directory("agents", &config) {
        Ok(directory) => directory,
        Err(result) => return result,
    };

    let entries = entries(&directory, category);
    if json_output {
        return CommandResult::document("agents", &entries, 0);
    }

    CommandResult::text(render_human(&entries))
}

fn entries<'a>(directory: &'a ConnectorDirectory, category: Option<&str>) -> Vec<AgentEntry<'a>> {
    directory
        .agents()
        .iter()
        .filter(|agent| {
            category.map_or(true, |category| agent.category.as_str().eq_ignore_ascii_case(category))
        })
        .map(|agent| {
            let missing_connectors = directory.missing_connectors(agent.key.as_str());
            AgentEntry {
                key: agent.key.as_str(),
                name: &agent.name,
                category: agent.category.as_str(),
                required_connectors: agent.required_connectors.clone(),
                ready: missing_connectors.is_empty(),
                missing_connectors,
            }
        })
        .collect()
}

fn render_human(entries: &[AgentEntry<'_>]) -> String {
    if entries.is_empty() {
        return "no agents match".to_string();
    }

    entries
        .iter()
        .map(|entry| {
            let marker = if entry.ready { "ready" } else { "pending" };
            let mut line = format!("- [{marker}] {} ({}, {})", entry.key, entry.name, entry.category);
            if !entry.missing_connectors.is_empty() {
                let missing =
                    entry.missing_connectors.iter().map(ConnectorType::as_str).collect::<Vec<_>>();
                line.push_str(&format!(" missing: {}", missing.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use agis_core::connectors::ConnectorDirectory;

    use super::{entries, render_human};

    #[test]
    fn pending_agents_list_their_missing_connectors() {
        let directory = ConnectorDirectory::builtin();
        let listed = entries(&directory, None);

        let docs = listed.iter().find(|entry| entry.key == "docs-syncer").expect("docs-syncer");
        assert!(!docs.ready);
        assert_eq!(docs.missing_connectors.len(), 1);

        let output = render_human(&listed);
        assert!(output.contains("- [pending] docs-syncer (Docs Syncer, Coding) missing: notion"));
        assert!(output.contains("- [ready] pr-reviewer"));
    }

    #[test]
    fn category_filter_is_case_insensitive() {
        let directory = ConnectorDirectory::builtin();
        let listed = entries(&directory, Some("ANALYTICS"));

        assert!(!listed.is_empty());
        assert!(listed.iter().all(|entry| entry.category == "Analytics"));
    }
}
