//! SQLite-backed job status store.

use std::sync::Arc;

use async_trait::async_trait;
use fusion_domain::{JobId, JobState, JobStatus, StatusDetail};
use sqlx::{Row, SqlitePool};

use crate::infrastructure::ports::{ClockPort, StatusStoreError, StatusStorePort};

/// One row per job holding only its latest status.
pub struct SqliteStatusStore {
    pool: SqlitePool,
    clock: Arc<dyn ClockPort>,
}

impl SqliteStatusStore {
    pub async fn new(pool: SqlitePool, clock: Arc<dyn ClockPort>) -> Result<Self, StatusStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_status (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                stage_rank INTEGER NOT NULL,
                terminal INTEGER NOT NULL,
                detail_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StatusStoreError::database("status_store.init", e))?;

        Ok(Self { pool, clock })
    }
}

#[async_trait]
impl StatusStorePort for SqliteStatusStore {
    async fn set_status(&self, job_id: &JobId, state: &JobState) -> Result<bool, StatusStoreError> {
        let detail_json =
            serde_json::to_string(&state.detail).map_err(StatusStoreError::serialization)?;
        let now = self.clock.now().to_rfc3339();

        // The conditional upsert is the monotonicity guard: concurrent or
        // duplicate writers cannot move a job backwards or out of a terminal state.
        let result = sqlx::query(
            r#"
            INSERT INTO job_status (job_id, status, stage_rank, terminal, detail_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                stage_rank = excluded.stage_rank,
                terminal = excluded.terminal,
                detail_json = excluded.detail_json,
                updated_at = excluded.updated_at
            WHERE job_status.terminal = 0
              AND job_status.stage_rank <= excluded.stage_rank
            "#,
        )
        .bind(job_id.as_str())
        .bind(state.status.as_str())
        .bind(i64::from(state.status.rank()))
        .bind(state.status.is_terminal())
        .bind(detail_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StatusStoreError::database("status_store.set", e))?;

        let applied = result.rows_affected() > 0;
        if applied {
            tracing::info!(job_id = %job_id, status = %state.status, "Job status updated");
        } else {
            tracing::debug!(
                job_id = %job_id,
                status = %state.status,
                "Ignored non-monotonic status write"
            );
        }
        Ok(applied)
    }

    async fn get_status(&self, job_id: &JobId) -> Result<Option<JobState>, StatusStoreError> {
        let row = sqlx::query("SELECT status, detail_json FROM job_status WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StatusStoreError::database("status_store.get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");
        let status: JobStatus = status.parse().map_err(StatusStoreError::serialization)?;
        let detail_json: String = row.get("detail_json");
        let detail: StatusDetail =
            serde_json::from_str(&detail_json).map_err(StatusStoreError::serialization)?;

        Ok(Some(JobState { status, detail }))
    }
}
