//! Run log (`enrichment_runs`)

use crate::error::{EnrichError, EnrichResult};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Counters of one nightly run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSummary {
    pub circuits_imported: Option<usize>,
    pub devices_synced: Option<usize>,
    /// Set when the vendor sync failed and the stored inventory was used
    pub sync_error: Option<String>,
    pub sites_seen: usize,
    pub sites_excluded: usize,
    pub sites_changed: usize,
    pub sites_processed: usize,
    pub sites_skipped: usize,
    pub sites_failed: usize,
    pub review_flagged: usize,
    pub ips_resolved: usize,
    pub ips_cached: usize,
    pub ips_not_found: usize,
    pub ips_failed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub summary: RunSummary,
}

/// Open a run log entry in `running` state
pub async fn start_run(pool: &SqlitePool) -> EnrichResult<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO enrichment_runs (run_id, started_at, status, summary) VALUES (?, ?, ?, '{}')",
    )
    .bind(run_id.to_string())
    .bind(dsrc_common::time::now_rfc3339())
    .bind(RunStatus::Running.as_str())
    .execute(pool)
    .await?;

    tracing::debug!(run_id = %run_id, "Run log entry opened");
    Ok(run_id)
}

/// Close a run log entry with its final status and counters
pub async fn finish_run(
    pool: &SqlitePool,
    run_id: Uuid,
    status: RunStatus,
    summary: &RunSummary,
) -> EnrichResult<()> {
    let result = sqlx::query(
        "UPDATE enrichment_runs SET finished_at = ?, status = ?, summary = ? WHERE run_id = ?",
    )
    .bind(dsrc_common::time::now_rfc3339())
    .bind(status.as_str())
    .bind(serde_json::to_string(summary)?)
    .bind(run_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(EnrichError::InvalidInput(format!("unknown run {}", run_id)));
    }
    Ok(())
}

pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> EnrichResult<Option<RunRecord>> {
    let row = sqlx::query(
        "SELECT run_id, started_at, finished_at, status, summary FROM enrichment_runs WHERE run_id = ?",
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Most recent runs first
pub async fn latest_runs(pool: &SqlitePool, limit: i64) -> EnrichResult<Vec<RunRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, started_at, finished_at, status, summary
        FROM enrichment_runs
        ORDER BY started_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}

fn run_from_row(row: &SqliteRow) -> EnrichResult<RunRecord> {
    let run_id: String = row.get("run_id");
    let status: String = row.get("status");
    let summary: String = row.get("summary");

    Ok(RunRecord {
        run_id: Uuid::parse_str(&run_id)
            .map_err(|e| EnrichError::InvalidInput(format!("bad run id '{}': {}", run_id, e)))?,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        status: status.parse().map_err(EnrichError::InvalidInput)?,
        summary: serde_json::from_str(&summary)?,
    })
}
