pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use agis_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use clap::{Parser, Subcommand};
use tracing::Level;

use crate::commands::run::RunArgs;

#[derive(Debug, Parser)]
#[command(
    name = "agis",
    about = "AGIS agent operator CLI",
    long_about = "Inspect the agent catalog and connector readiness, execute agent runs under \
                  tenant budgets, and manage the run database.",
    after_help = "Examples:\n  agis agents\n  agis readiness docs-syncer\n  agis run pr-reviewer --tenant acme --inputs '{\"pr\": 42}'\n  agis doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to agis.toml or config/agis.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the database URL")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override the log level")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "List catalog agents with their connector readiness")]
    Agents {
        #[arg(long, help = "Only agents in this category")]
        category: Option<String>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Summarize catalog readiness, or report on one agent")]
    Readiness {
        agent_key: Option<String>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Execute one agent run and print the finalized run record")]
    Run {
        agent_key: String,
        #[arg(long, default_value = "default", help = "Tenant the run is billed to")]
        tenant: String,
        #[arg(long, help = "Inputs as a JSON object")]
        inputs: Option<String>,
        #[arg(long, help = "TOML file with budget, scope and PII redaction settings")]
        agent_config: Option<PathBuf>,
        #[arg(long, help = "Override the run duration ceiling in milliseconds")]
        max_duration_ms: Option<u64>,
        #[arg(long, help = "Record the run and its audit trail in the database")]
        persist: bool,
    },
    #[command(about = "List recorded runs for a tenant, newest first")]
    Runs {
        #[arg(long, default_value = "default")]
        tenant: String,
        #[arg(long, help = "queued|running|succeeded|failed|needs_review")]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, catalog, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Cli {
    fn load_options(&self, max_duration_ms: Option<u64>) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config.clone(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                catalog_path: None,
                max_duration_ms,
            },
        }
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber installed earlier (tests, embedding) stays in place.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let max_duration_ms = match &cli.command {
        Command::Run { max_duration_ms, .. } => *max_duration_ms,
        _ => None,
    };
    let options = cli.load_options(max_duration_ms);
    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Agents { category, json } => {
            commands::agents::run(&options, category.as_deref(), json)
        }
        Command::Readiness { agent_key, json } => {
            commands::readiness::run(&options, agent_key.as_deref(), json)
        }
        Command::Run { agent_key, tenant, inputs, agent_config, persist, .. } => {
            let args = RunArgs { agent_key, tenant_id: tenant, inputs, agent_config, persist };
            commands::run::run(&options, &args)
        }
        Command::Runs { tenant, status, limit } => {
            commands::runs::run(&options, &tenant, status.as_deref(), limit)
        }
        Command::Migrate => commands::migrate::run(&options),
        Command::Config => commands::CommandResult::text(commands::config::run(&options)),
        Command::Doctor { json } => {
            let (output, passed) = commands::doctor::run(&options, json);
            commands::CommandResult { exit_code: if passed { 0 } else { 1 }, output }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn run_arguments_parse_with_global_overrides() {
        let cli = Cli::try_parse_from([
            "agis",
            "run",
            "pr-reviewer",
            "--tenant",
            "acme",
            "--inputs",
            r#"{"pr": 42}"#,
            "--max-duration-ms",
            "5000",
            "--database-url",
            "sqlite::memory:",
        ])
        .expect("parse");

        let Command::Run { agent_key, tenant, max_duration_ms, persist, .. } = &cli.command else {
            panic!("expected run command");
        };
        assert_eq!(agent_key, "pr-reviewer");
        assert_eq!(tenant, "acme");
        assert_eq!(*max_duration_ms, Some(5000));
        assert!(!persist);

        let options = cli.load_options(*max_duration_ms);
        assert!(!options.require_file);
        assert_eq!(options.overrides.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(options.overrides.max_duration_ms, Some(5000));
    }

    #[test]
    fn explicit_config_file_is_required() {
        let cli = Cli::try_parse_from(["agis", "--config", "ops/agis.toml", "doctor", "--json"])
            .expect("parse");
        let options = cli.load_options(None);

        assert!(options.require_file);
        assert!(matches!(cli.command, Command::Doctor { json: true }));
    }
}
