//! Built-in capability catalog and the TOML catalog file format.
//!
//! The catalog is loaded once at process start. A file catalog has the same shape as the
//! built-in one:
//!
//! ```toml
//! [[connectors]]
//! connector_type = "github"
//! available = true
//! required_credential_keys = ["GITHUB_TOKEN"]
//!
//! [[agents]]
//! key = "pr-reviewer"
//! name = "PR Reviewer"
//! category = "Coding"
//! required_connectors = ["github"]
//! triggers = ["webhook"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::agent::{AgentCategory, AgentDefinition, TriggerKind};
use crate::domain::connector::{Connector, ConnectorType};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not read catalog file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse catalog file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("could not parse catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("connector `{0}` is declared more than once")]
    DuplicateConnector(ConnectorType),
    #[error("agent `{0}` is declared more than once")]
    DuplicateAgent(String),
    #[error("agent `{agent_key}` requires undeclared connector `{connector_type}`")]
    UndeclaredConnector { agent_key: String, connector_type: ConnectorType },
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CatalogFile {
    #[serde(default)]
    pub(crate) connectors: Vec<Connector>,
    #[serde(default)]
    pub(crate) agents: Vec<AgentDefinition>,
}

pub(crate) fn parse_catalog(raw: &str) -> Result<CatalogFile, toml::de::Error> {
    toml::from_str::<CatalogFile>(raw)
}

pub(crate) fn read_catalog(path: &Path) -> Result<CatalogFile, CatalogError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| CatalogError::ReadFile { path: path.to_path_buf(), source })?;

    parse_catalog(&raw)
        .map_err(|source| CatalogError::ParseFile { path: path.to_path_buf(), source })
}

pub fn builtin_connectors() -> Vec<Connector> {
    use ConnectorType::*;

    vec![
        Connector::new(Github, true)
            .with_tool_prefix("mcp__github__")
            .with_credential_keys(["GITHUB_TOKEN"])
            .with_scopes(["repo", "write:org", "read:user"]),
        Connector::new(Stripe, true)
            .with_tool_prefix("mcp__stripe__")
            .with_credential_keys(["STRIPE_SECRET_KEY"]),
        Connector::new(Supabase, true)
            .with_tool_prefix("mcp__supabase__")
            .with_credential_keys(["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY"]),
        Connector::new(Netlify, true)
            .with_tool_prefix("mcp__netlify__")
            .with_credential_keys(["NETLIFY_AUTH_TOKEN"]),
        Connector::new(Clerk, true)
            .with_tool_prefix("mcp__clerk__")
            .with_credential_keys(["CLERK_SECRET_KEY"]),
        Connector::new(ChromeDevtools, true).with_tool_prefix("mcp__chrome-devtools__"),
        Connector::new(Slack, false)
            .with_credential_keys(["SLACK_BOT_TOKEN"])
            .with_scopes(["chat:write", "channels:read", "users:read"]),
        Connector::new(Gmail, false)
            .with_credential_keys(["GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET"])
            .with_scopes(["gmail.send", "gmail.readonly"]),
        Connector::new(Google, false)
            .with_credential_keys(["GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET"])
            .with_scopes(["calendar", "drive"]),
        Connector::new(Notion, false).with_credential_keys(["NOTION_API_KEY"]),
        Connector::new(Pagerduty, false).with_credential_keys(["PAGERDUTY_API_KEY"]),
        Connector::new(MacosAutomator, false),
    ]
}

pub fn builtin_agents() -> Vec<AgentDefinition> {
    use AgentCategory::*;
    use ConnectorType::*;
    use TriggerKind::*;

    vec![
        AgentDefinition::new("code-refactorer", "Code Refactorer", Coding)
            .describe("Opens refactoring pull requests for flagged modules")
            .requires(&[Github])
            .triggered_by(&[Manual, Schedule])
            .measured_by("PRs merged, lint debt removed"),
        AgentDefinition::new("spec-to-scaffold", "Spec to Scaffold", Coding)
            .describe("Turns a written spec into a scaffolded repository branch")
            .requires(&[Github])
            .triggered_by(&[Manual])
            .measured_by("Time to first commit"),
        AgentDefinition::new("pr-reviewer", "PR Reviewer", Coding)
            .describe("Reviews pull requests and posts inline findings")
            .requires(&[Github])
            .triggered_by(&[Webhook])
            .measured_by("Review latency, defects caught"),
        AgentDefinition::new("dependency-sentinel", "Dependency Sentinel", Coding)
            .describe("Watches dependency advisories and opens upgrade PRs")
            .requires(&[Github])
            .triggered_by(&[Schedule, Webhook])
            .measured_by("Mean time to patch"),
        AgentDefinition::new("docs-syncer", "Docs Syncer", Coding)
            .describe("Keeps workspace docs in step with merged code")
            .requires(&[Github, Notion])
            .triggered_by(&[Webhook])
            .measured_by("Stale pages"),
        AgentDefinition::new("approvals-router", "Approvals Router", AdminOps)
            .describe("Routes approval requests to the right owner")
            .requires(&[Slack, Gmail])
            .triggered_by(&[Webhook, Manual])
            .measured_by("Approval turnaround"),
        AgentDefinition::new("calendar-concierge", "Calendar Concierge", AdminOps)
            .describe("Schedules and reshuffles meetings on request")
            .requires(&[Google])
            .triggered_by(&[Manual])
            .measured_by("Meetings scheduled without back-and-forth"),
        AgentDefinition::new("vendor-intake", "Vendor Intake", AdminOps)
            .describe("Collects vendor paperwork and files it for review")
            .requires(&[Google, Notion])
            .triggered_by(&[Webhook])
            .measured_by("Intake cycle time"),
        AgentDefinition::new("ticket-triage", "Ticket Triage", AdminOps)
            .describe("Labels and routes incoming issues")
            .requires(&[Slack, Github])
            .triggered_by(&[Webhook, Stream])
            .measured_by("Untriaged backlog"),
        AgentDefinition::new("ops-runbook", "Ops Runbook", AdminOps)
            .describe("Executes runbook steps for paged incidents")
            .requires(&[Pagerduty, MacosAutomator])
            .triggered_by(&[Webhook])
            .measured_by("Mean time to mitigate"),
        AgentDefinition::new("kpi-pipeline", "KPI Pipeline", Analytics)
            .describe("Recomputes KPI tables on a schedule")
            .requires(&[Supabase])
            .triggered_by(&[Schedule])
            .measured_by("Pipeline freshness"),
        AgentDefinition::new("forecaster", "Forecaster", Analytics)
            .describe("Produces rolling revenue and usage forecasts")
            .requires(&[Supabase])
            .triggered_by(&[Schedule, Manual])
            .measured_by("Forecast error"),
        AgentDefinition::new("experiment-analyst", "Experiment Analyst", Analytics)
            .describe("Summarizes experiment results with significance checks")
            .requires(&[Supabase])
            .triggered_by(&[Manual])
            .measured_by("Experiments read out"),
        AgentDefinition::new("churn-watch", "Churn Watch", Analytics)
            .describe("Flags accounts showing churn signals")
            .requires(&[Stripe, Supabase])
            .triggered_by(&[Schedule, Stream])
            .measured_by("Saved accounts"),
        AgentDefinition::new("unit-economics", "Unit Economics", Analytics)
            .describe("Reports CAC, LTV and margin per plan")
            .requires(&[Stripe, Supabase])
            .triggered_by(&[Schedule])
            .measured_by("Report latency"),
        AgentDefinition::new("campaign-builder", "Campaign Builder", MarketingCreative)
            .describe("Drafts multi-channel campaign briefs")
            .requires(&[Slack, Notion])
            .triggered_by(&[Manual])
            .measured_by("Campaigns launched"),
        AgentDefinition::new("seo-aeo-optimizer", "SEO/AEO Optimizer", MarketingCreative)
            .describe("Audits deployed pages and ships search fixes")
            .requires(&[Netlify, ChromeDevtools])
            .triggered_by(&[Schedule, Manual])
            .measured_by("Lighthouse score, ranked queries"),
        AgentDefinition::new("content-studio", "Content Studio", MarketingCreative)
            .describe("Drafts long-form content from briefs")
            .requires(&[Notion])
            .triggered_by(&[Manual])
            .measured_by("Drafts accepted"),
        AgentDefinition::new("outbound-prospector", "Outbound Prospector", MarketingCreative)
            .describe("Researches leads and drafts outreach emails")
            .requires(&[Gmail])
            .triggered_by(&[Schedule])
            .measured_by("Reply rate"),
        AgentDefinition::new("release-notes", "Release Notes", MarketingCreative)
            .describe("Writes and publishes release notes from merged PRs")
            .requires(&[Github, Netlify])
            .triggered_by(&[Webhook, Manual])
            .measured_by("Notes published per release"),
    ]
}
