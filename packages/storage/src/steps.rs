// ABOUTME: Write-ahead log of workflow runs and their step results
// ABOUTME: Step outputs are keyed by (run_id, step_name) so resumed runs skip finished steps

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::{parse_timestamp, timestamp, Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Incomplete,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "incomplete" => Some(Self::Incomplete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: String,
    pub project_id: String,
    pub request_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub project_id: String,
    pub request_text: String,
    pub status: RunStatus,
    pub outcome: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    pub step_name: String,
    pub status: StepStatus,
    /// Executions so far, successful or not
    pub attempts: u32,
    pub output: Option<Value>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Durable record of runs and step results
#[async_trait]
pub trait StepStore: Send + Sync {
    /// Register a run, or return the existing record for the same id
    async fn begin_run(&self, run: NewRun) -> Result<RunRecord>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    async fn finish_run(&self, run_id: &str, status: RunStatus, outcome: &Value) -> Result<()>;

    async fn load(&self, run_id: &str, step_name: &str) -> Result<Option<StepRecord>>;

    async fn record_success(&self, run_id: &str, step_name: &str, output: &Value) -> Result<()>;

    /// Record a failed attempt; returns the attempt count including this one
    async fn record_failure(&self, run_id: &str, step_name: &str, error: &str) -> Result<u32>;
}

fn row_to_run(row: &SqliteRow) -> Result<RunRecord> {
    let status: String = row.try_get("status")?;
    let outcome: Option<String> = row.try_get("outcome")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(RunRecord {
        run_id: row.try_get("run_id")?,
        project_id: row.try_get("project_id")?,
        request_text: row.try_get("request_text")?,
        status: RunStatus::from_str(&status)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown run status '{}'", status)))?,
        outcome: outcome.as_deref().map(serde_json::from_str).transpose()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<StepRecord> {
    let status: String = row.try_get("status")?;
    let output: Option<String> = row.try_get("output")?;
    let attempts: i64 = row.try_get("attempts")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(StepRecord {
        run_id: row.try_get("run_id")?,
        step_name: row.try_get("step_name")?,
        status: match status.as_str() {
            "succeeded" => StepStatus::Succeeded,
            "failed" => StepStatus::Failed,
            other => {
                return Err(StorageError::Corrupt(format!("unknown step status '{}'", other)))
            }
        },
        attempts: attempts.max(0) as u32,
        output: output.as_deref().map(serde_json::from_str).transpose()?,
        last_error: row.try_get("last_error")?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub struct StepStorage {
    pool: SqlitePool,
}

impl StepStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_steps(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        let rows = sqlx::query("SELECT * FROM workflow_steps WHERE run_id = ? ORDER BY created_at, rowid")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_step).collect()
    }
}

#[async_trait]
impl StepStore for StepStorage {
    async fn begin_run(&self, run: NewRun) -> Result<RunRecord> {
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (run_id, project_id, request_text, status, created_at, updated_at)
            VALUES (?, ?, ?, 'running', ?, ?)
            ON CONFLICT(run_id) DO NOTHING
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.project_id)
        .bind(&run.request_text)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_run(&run.run_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("run {}", run.run_id)))
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row = sqlx::query("SELECT * FROM workflow_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn finish_run(&self, run_id: &str, status: RunStatus, outcome: &Value) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE workflow_runs SET status = ?, outcome = ?, updated_at = ? WHERE run_id = ?",
        )
        .bind(status.as_str())
        .bind(serde_json::to_string(outcome)?)
        .bind(timestamp(Utc::now()))
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StorageError::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    async fn load(&self, run_id: &str, step_name: &str) -> Result<Option<StepRecord>> {
        let row = sqlx::query("SELECT * FROM workflow_steps WHERE run_id = ? AND step_name = ?")
            .bind(run_id)
            .bind(step_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_step).transpose()
    }

    async fn record_success(&self, run_id: &str, step_name: &str, output: &Value) -> Result<()> {
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO workflow_steps (run_id, step_name, status, attempts, output, created_at, updated_at)
            VALUES (?, ?, 'succeeded', 1, ?, ?, ?)
            ON CONFLICT(run_id, step_name) DO UPDATE SET
                status = 'succeeded',
                attempts = attempts + 1,
                output = excluded.output,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(run_id)
        .bind(step_name)
        .bind(serde_json::to_string(output)?)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!(run_id, step = step_name, "Step result recorded");
        Ok(())
    }

    async fn record_failure(&self, run_id: &str, step_name: &str, error: &str) -> Result<u32> {
        let now = timestamp(Utc::now());
        let (attempts,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO workflow_steps (run_id, step_name, status, attempts, last_error, created_at, updated_at)
            VALUES (?, ?, 'failed', 1, ?, ?, ?)
            ON CONFLICT(run_id, step_name) DO UPDATE SET
                status = 'failed',
                attempts = attempts + 1,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            RETURNING attempts
            "#,
        )
        .bind(run_id)
        .bind(step_name)
        .bind(error)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(attempts.max(0) as u32)
    }
}
