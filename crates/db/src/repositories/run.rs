use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use agis_core::domain::agent::AgentKey;
use agis_core::domain::run::{JsonMap, Run, RunId, RunStatus, TenantId};
use agis_core::records::{RunSink, SinkError};

use super::{
    format_timestamp, from_sql_integer, parse_timestamp, to_sql_integer, RepositoryError,
    RunRepository,
};
use crate::DbPool;

const RUN_COLUMNS: &str = "id, agent_key, tenant_id, status, started_at, finished_at, inputs_json,
                           outputs_json, cost_cents, tool_calls, tokens_used, errors_json";

pub struct SqlRunRepository {
    pool: DbPool,
}

impl SqlRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn write(&self, run: &Run, upsert: bool) -> Result<(), RepositoryError> {
        let row = RunRow::encode(run)?;
        let sql = if upsert {
            "INSERT INTO agent_run (id, agent_key, tenant_id, status, started_at, finished_at,
                                    inputs_json, outputs_json, cost_cents, tool_calls,
                                    tokens_used, errors_json, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 finished_at = excluded.finished_at,
                 inputs_json = excluded.inputs_json,
                 outputs_json = excluded.outputs_json,
                 cost_cents = excluded.cost_cents,
                 tool_calls = excluded.tool_calls,
                 tokens_used = excluded.tokens_used,
                 errors_json = excluded.errors_json,
                 recorded_at = excluded.recorded_at"
        } else {
            "INSERT INTO agent_run (id, agent_key, tenant_id, status, started_at, finished_at,
                                    inputs_json, outputs_json, cost_cents, tool_calls,
                                    tokens_used, errors_json, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        };

        sqlx::query(sql)
            .bind(&run.id.0)
            .bind(&run.agent_key.0)
            .bind(&run.tenant_id.0)
            .bind(run.status.as_str())
            .bind(format_timestamp(run.started_at))
            .bind(run.finished_at.map(format_timestamp))
            .bind(row.inputs_json)
            .bind(row.outputs_json)
            .bind(row.cost_cents)
            .bind(row.tool_calls)
            .bind(row.tokens_used)
            .bind(row.errors_json)
            .bind(format_timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

struct RunRow {
    inputs_json: Option<String>,
    outputs_json: Option<String>,
    cost_cents: i64,
    tool_calls: Option<i64>,
    tokens_used: Option<i64>,
    errors_json: String,
}

impl RunRow {
    fn encode(run: &Run) -> Result<Self, RepositoryError> {
        let to_json = |map: &JsonMap| {
            serde_json::to_string(map).map_err(|e| RepositoryError::Encode(e.to_string()))
        };

        Ok(Self {
            inputs_json: run.inputs.as_ref().map(to_json).transpose()?,
            outputs_json: run.outputs.as_ref().map(to_json).transpose()?,
            cost_cents: to_sql_integer("cost_cents", run.cost_cents)?,
            tool_calls: run.tool_calls.map(|v| to_sql_integer("tool_calls", v)).transpose()?,
            tokens_used: run.tokens_used.map(|v| to_sql_integer("tokens_used", v)).transpose()?,
            errors_json: serde_json::to_string(&run.errors)
                .map_err(|e| RepositoryError::Encode(e.to_string()))?,
        })
    }
}

fn decode_json_map(
    column: &str,
    value: Option<String>,
) -> Result<Option<JsonMap>, RepositoryError> {
    value
        .map(|raw| {
            serde_json::from_str::<JsonMap>(&raw)
                .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
        })
        .transpose()
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<Run, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let agent_key: String = row.try_get("agent_key").map_err(decode)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(decode)?;
    let status_str: String = row.try_get("status").map_err(decode)?;
    let started_at_str: String = row.try_get("started_at").map_err(decode)?;
    let finished_at_str: Option<String> = row.try_get("finished_at").map_err(decode)?;
    let inputs_json: Option<String> = row.try_get("inputs_json").map_err(decode)?;
    let outputs_json: Option<String> = row.try_get("outputs_json").map_err(decode)?;
    let cost_cents: i64 = row.try_get("cost_cents").map_err(decode)?;
    let tool_calls: Option<i64> = row.try_get("tool_calls").map_err(decode)?;
    let tokens_used: Option<i64> = row.try_get("tokens_used").map_err(decode)?;
    let errors_json: String = row.try_get("errors_json").map_err(decode)?;

    let status = RunStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown run status `{status_str}`")))?;

    Ok(Run {
        id: RunId(id),
        agent_key: AgentKey(agent_key),
        tenant_id: TenantId(tenant_id),
        status,
        started_at: parse_timestamp("started_at", &started_at_str)?,
        finished_at: finished_at_str
            .map(|value| parse_timestamp("finished_at", &value))
            .transpose()?,
        inputs: decode_json_map("inputs_json", inputs_json)?,
        outputs: decode_json_map("outputs_json", outputs_json)?,
        cost_cents: from_sql_integer("cost_cents", cost_cents)?,
        tool_calls: tool_calls.map(|v| from_sql_integer("tool_calls", v)).transpose()?,
        tokens_used: tokens_used.map(|v| from_sql_integer("tokens_used", v)).transpose()?,
        errors: serde_json::from_str(&errors_json)
            .map_err(|e| RepositoryError::Decode(format!("errors_json: {e}")))?,
    })
}

#[async_trait]
impl RunRepository for SqlRunRepository {
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM agent_run WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_run).transpose()
    }

    async fn save(&self, run: &Run) -> Result<(), RepositoryError> {
        self.write(run, true).await
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        status: Option<RunStatus>,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {RUN_COLUMNS} FROM agent_run
                 WHERE tenant_id = ? AND status = ?
                 ORDER BY started_at DESC
                 LIMIT ?"
            ))
            .bind(&tenant_id.0)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {RUN_COLUMNS} FROM agent_run
                 WHERE tenant_id = ?
                 ORDER BY started_at DESC
                 LIMIT ?"
            ))
            .bind(&tenant_id.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_run).collect::<Result<Vec<_>, _>>()
    }
}

/// Finalized runs are inserted once; a second record for the same id is refused.
#[async_trait]
impl RunSink for SqlRunRepository {
    async fn record(&self, run: &Run) -> Result<(), SinkError> {
        run.check_invariants().map_err(|error| SinkError::Rejected(error.to_string()))?;

        match self.write(run, false).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::Database(sqlx::Error::Database(error)))
                if error.is_unique_violation() =>
            {
                Err(SinkError::Rejected(format!("run {} was already recorded", run.id)))
            }
            Err(error @ RepositoryError::Encode(_)) => Err(SinkError::Rejected(error.to_string())),
            Err(error) => Err(SinkError::Unavailable(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use agis_core::domain::run::{AgentConfig, ExecutionContext, Run, RunStatus, TenantId};
    use agis_core::records::{RunSink, SinkError};

    use super::SqlRunRepository;
    use crate::repositories::RunRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlRunRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlRunRepository::new(pool)
    }

    fn succeeded_run(tenant: &str) -> Run {
        let mut inputs = serde_json::Map::new();
        inputs.insert("pr".to_string(), json!(42));
        let mut run = Run::queued(&ExecutionContext::new(
            "pr-reviewer",
            "PR Reviewer",
            tenant,
            inputs.clone(),
            AgentConfig::default(),
        ));
        run.status = RunStatus::Succeeded;
        run.finished_at = Some(Utc::now());
        run.inputs = Some(inputs);
        run.outputs = Some(serde_json::Map::new());
        run.cost_cents = 4;
        run.tool_calls = Some(3);
        run.tokens_used = Some(5_000);
        run
    }

    #[tokio::test]
    async fn recorded_run_round_trips() {
        let repo = setup().await;
        let run = succeeded_run("tenant-a");

        repo.record(&run).await.expect("record");
        let loaded = repo.find_by_id(&run.id).await.expect("find").expect("present");

        assert_eq!(loaded.status, RunStatus::Succeeded);
        assert_eq!(loaded.cost_cents, 4);
        assert_eq!(loaded.tool_calls, Some(3));
        assert_eq!(loaded.tokens_used, Some(5_000));
        assert_eq!(loaded.inputs, run.inputs);
        assert_eq!(loaded.started_at.timestamp_micros(), run.started_at.timestamp_micros());
        assert!(loaded.errors.is_empty());
    }

    #[tokio::test]
    async fn second_record_for_same_run_is_rejected() {
        let repo = setup().await;
        let run = succeeded_run("tenant-a");

        repo.record(&run).await.expect("first record");
        let error = repo.record(&run).await.expect_err("duplicate");

        assert!(matches!(error, SinkError::Rejected(ref message) if message.contains("already recorded")));
    }

    #[tokio::test]
    async fn inconsistent_run_is_not_recorded() {
        let repo = setup().await;
        let mut run = succeeded_run("tenant-a");
        run.finished_at = None;

        assert!(matches!(repo.record(&run).await, Err(SinkError::Rejected(_))));
        assert!(repo.find_by_id(&run.id).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn save_updates_a_reviewed_run() {
        let repo = setup().await;
        let mut run = succeeded_run("tenant-a");
        run.status = RunStatus::NeedsReview;
        run.finished_at = None;
        run.cost_cents = 0;
        run.tool_calls = None;
        run.tokens_used = None;
        run.outputs = None;
        repo.save(&run).await.expect("save pending");

        run.status = RunStatus::Failed;
        run.finished_at = Some(Utc::now());
        run.errors.push("Run cancelled: approval declined".to_string());
        repo.save(&run).await.expect("save decision");

        let loaded = repo.find_by_id(&run.id).await.expect("find").expect("present");
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.errors, vec!["Run cancelled: approval declined".to_string()]);
    }

    #[tokio::test]
    async fn lists_tenant_runs_newest_first() {
        let repo = setup().await;
        let mut older = succeeded_run("tenant-a");
        older.started_at = Utc::now() - Duration::minutes(5);
        let mut failed = succeeded_run("tenant-a");
        failed.status = RunStatus::Failed;
        failed.errors.push("Missing connectors: notion".to_string());
        let other_tenant = succeeded_run("tenant-b");

        for run in [&older, &failed, &other_tenant] {
            repo.record(run).await.expect("record");
        }

        let all = repo
            .list_for_tenant(&TenantId("tenant-a".to_string()), None, 10)
            .await
            .expect("list");
        let ids = all.iter().map(|run| run.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids, vec![failed.id.clone(), older.id.clone()]);

        let failures = repo
            .list_for_tenant(&TenantId("tenant-a".to_string()), Some(RunStatus::Failed), 10)
            .await
            .expect("list failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].errors, vec!["Missing connectors: notion".to_string()]);
    }
}
