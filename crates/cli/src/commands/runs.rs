use agis_core::config::LoadOptions;
use agis_core::domain::run::{RunStatus, TenantId};
use agis_db::{connect_with_config, migrations, RunRepository, SqlRunRepository};

use crate::commands::{load_config, runtime, CommandResult};

pub fn run(
    options: &LoadOptions,
    tenant_id: &str,
    status: Option<&str>,
    limit: u32,
) -> CommandResult {
    let status = match status.map(|raw| RunStatus::parse(raw).ok_or(raw)).transpose() {
        Ok(status) => status,
        Err(raw) => {
            return CommandResult::failure(
                "runs",
                "invalid_status",
                format!(
                    "unknown run status `{raw}` \
                     (expected queued|running|succeeded|failed|needs_review)"
                ),
                2,
            );
        }
    };
    let config = match load_config("runs", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("runs") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let runs = SqlRunRepository::new(pool.clone())
            .list_for_tenant(&TenantId(tenant_id.to_string()), status, limit)
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(runs)
    });

    match result {
        Ok(runs) => CommandResult::document("runs", &runs, 0),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("runs", error_class, message, exit_code)
        }
    }
}
