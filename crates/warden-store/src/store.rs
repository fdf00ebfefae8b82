//! Durable task queue and breaker persistence (§4.1, §4.5, §6).

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;

use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};
use warden_core::{
    now_unix, BreakerConfig, BreakerState, BreakerStatus, FailureReason, Task, TaskEventKind,
    TaskStatus, TaskType,
};

use crate::error::{StoreError, StoreResult};

/// Durable store for tasks and circuit breaker state, backed by a single
/// sqlite file shared by every actor in the process (§5).
#[derive(Clone)]
pub struct WardenStore {
    pool: SqlitePool,
}

fn query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::Query { operation, source }
}

impl WardenStore {
    /// Wrap an already-open, migrated pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `db_file`, applying migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or migrations fail.
    pub async fn open(db_file: &std::path::Path) -> StoreResult<Self> {
        Ok(Self::new(crate::pool::open_pool(db_file).await?))
    }

    /// Access the underlying pool, e.g. for health checks.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn record_event(
        &self,
        hash: &str,
        task_type: TaskType,
        kind: TaskEventKind,
        detail: Option<&str>,
    ) -> StoreResult<()> {
        let now = now_unix() as f64;
        sqlx::query(
            "INSERT INTO task_events (torrent_hash, task_type, event_kind, detail, created_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(hash)
        .bind(task_type.as_str())
        .bind(kind.as_str())
        .bind(detail)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(query_err("record_event"))?;
        Ok(())
    }

    /// Insert-if-absent. Returns `true` iff a new row was inserted; a row
    /// already present in any status (including `processing`) returns
    /// `false` (I1, P8).
    #[instrument(skip(self))]
    pub async fn save(&self, hash: &str, task_type: TaskType) -> StoreResult<bool> {
        let now = now_unix() as f64;
        let result = sqlx::query(
            "INSERT INTO tasks
                (torrent_hash, task_type, status, retry_count, last_attempt, next_retry,
                 failure_reason, created_time, updated_time)
             VALUES (?1, ?2, 'pending', 0, 0, 0, NULL, ?3, ?3)
             ON CONFLICT (torrent_hash, task_type) DO NOTHING",
        )
        .bind(hash)
        .bind(task_type.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(query_err("save"))?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            self.record_event(hash, task_type, TaskEventKind::Created, None)
                .await?;
        }
        Ok(inserted)
    }

    /// Presence check for `(hash, task_type)` in any status.
    pub async fn exists(&self, hash: &str, task_type: TaskType) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM tasks WHERE torrent_hash = ?1 AND task_type = ?2")
            .bind(hash)
            .bind(task_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err("exists"))?;
        Ok(row.is_some())
    }

    /// Atomically claim up to `limit` eligible tasks (P1, P6): selects
    /// pending-first by `created_time`, then attempts to flip each row to
    /// `processing`, keeping only rows the `UPDATE` actually affected.
    #[instrument(skip(self))]
    pub async fn claim_pending(&self, limit: u32) -> StoreResult<Vec<Task>> {
        let now = now_unix() as f64;
        let mut tx = self.pool.begin().await.map_err(query_err("claim_begin"))?;

        let rows = sqlx::query(
            "SELECT torrent_hash, task_type, status, retry_count, last_attempt, next_retry,
                    failure_reason, created_time, updated_time
             FROM tasks
             WHERE status IN ('pending', 'failed') AND (next_retry = 0 OR next_retry <= ?1)
             ORDER BY CASE status WHEN 'pending' THEN 0 ELSE 1 END, created_time ASC
             LIMIT ?2",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(query_err("claim_select"))?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let task = row_to_task(row)?;

            let updated = sqlx::query(
                "UPDATE tasks SET status = 'processing', last_attempt = ?1, updated_time = ?1
                 WHERE torrent_hash = ?2 AND task_type = ?3 AND status IN ('pending', 'failed')",
            )
            .bind(now)
            .bind(&task.torrent_hash)
            .bind(task.task_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(query_err("claim_update"))?;

            if updated.rows_affected() == 1 {
                claimed.push(Task {
                    status: TaskStatus::Processing,
                    last_attempt: now as i64,
                    updated_time: now as i64,
                    ..task
                });
            }
        }

        tx.commit().await.map_err(query_err("claim_commit"))?;

        for task in &claimed {
            self.record_event(&task.torrent_hash, task.task_type, TaskEventKind::Claimed, None)
                .await?;
        }

        Ok(claimed)
    }

    /// Load the full row for `(hash, task_type)`, if present.
    pub async fn get(&self, hash: &str, task_type: TaskType) -> StoreResult<Option<Task>> {
        let row = sqlx::query(
            "SELECT torrent_hash, task_type, status, retry_count, last_attempt, next_retry,
                    failure_reason, created_time, updated_time
             FROM tasks WHERE torrent_hash = ?1 AND task_type = ?2",
        )
        .bind(hash)
        .bind(task_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err("get"))?;

        row.map(row_to_task).transpose()
    }

    /// Delete the row by primary key. Caller uses this only on terminal
    /// success or confirmed-absent torrent (I4).
    #[instrument(skip(self))]
    pub async fn complete(&self, hash: &str, task_type: TaskType) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE torrent_hash = ?1 AND task_type = ?2")
            .bind(hash)
            .bind(task_type.as_str())
            .execute(&self.pool)
            .await
            .map_err(query_err("complete"))?;

        let deleted = result.rows_affected() == 1;
        if deleted {
            self.record_event(hash, task_type, TaskEventKind::Completed, None)
                .await?;
        }
        Ok(deleted)
    }

    /// Reschedule a task for retry: sets `status='failed'`, increments
    /// `retry_count`, and stores `next_retry`/`failure_reason` (I3).
    #[instrument(skip(self))]
    pub async fn schedule_retry(
        &self,
        hash: &str,
        task_type: TaskType,
        next_retry: i64,
        reason: &FailureReason,
    ) -> StoreResult<bool> {
        let now = now_unix() as f64;
        let stored_reason = reason.as_stored();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'failed', retry_count = retry_count + 1,
                    next_retry = ?1, failure_reason = ?2, updated_time = ?3
             WHERE torrent_hash = ?4 AND task_type = ?5",
        )
        .bind(next_retry as f64)
        .bind(&stored_reason)
        .bind(now)
        .bind(hash)
        .bind(task_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(query_err("schedule_retry"))?;

        let updated = result.rows_affected() == 1;
        if updated {
            self.record_event(
                hash,
                task_type,
                TaskEventKind::Retried,
                Some(&stored_reason),
            )
            .await?;
        }
        Ok(updated)
    }

    /// Reap tasks stuck in `processing` for longer than `timeout_secs`
    /// back to `pending` (I2, P7). Returns the number reset.
    #[instrument(skip(self))]
    pub async fn reset_stuck(&self, timeout_secs: i64) -> StoreResult<u64> {
        let threshold = (now_unix() - timeout_secs) as f64;
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', updated_time = ?1
             WHERE status = 'processing' AND updated_time < ?2",
        )
        .bind(now_unix() as f64)
        .bind(threshold)
        .execute(&self.pool)
        .await
        .map_err(query_err("reset_stuck"))?;

        let n = result.rows_affected();
        if n > 0 {
            warn!(count = n, "reaped stuck processing tasks back to pending");
        }
        Ok(n)
    }

    /// For every task older than `age_secs`, probe the remote engine via
    /// `probe` (returns `true` if the torrent still exists); delete any
    /// task whose torrent is gone. Returns the number of orphans removed.
    pub async fn cleanup_orphans<F, Fut>(&self, age_secs: i64, mut probe: F) -> StoreResult<u64>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = bool>,
    {
        let threshold = (now_unix() - age_secs) as f64;
        let rows = sqlx::query(
            "SELECT DISTINCT torrent_hash FROM tasks WHERE created_time < ?1",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err("cleanup_orphans_select"))?;

        let mut removed = 0u64;
        for row in rows {
            let hash: String = row
                .try_get("torrent_hash")
                .map_err(query_err("cleanup_orphans_decode"))?;
            if !probe(hash.clone()).await {
                let result = sqlx::query("DELETE FROM tasks WHERE torrent_hash = ?1")
                    .bind(&hash)
                    .execute(&self.pool)
                    .await
                    .map_err(query_err("cleanup_orphans_delete"))?;
                removed += result.rows_affected();
                debug!(hash, "removed orphaned task for vanished torrent");
            }
        }
        Ok(removed)
    }

    /// Operational visibility: total row count and a breakdown by status.
    pub async fn stats(&self) -> StoreResult<StoreStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("stats"))?;

        let mut by_status = HashMap::new();
        let mut total = 0u64;
        for row in rows {
            let status: String = row.try_get("status").map_err(query_err("stats_decode"))?;
            let n: i64 = row.try_get("n").map_err(query_err("stats_decode"))?;
            total += n as u64;
            by_status.insert(status, n as u64);
        }
        Ok(StoreStats { total, by_status })
    }

    /// Load the persisted breaker status for `breaker_type`, if any row
    /// has been created for it yet.
    pub async fn load_breaker(&self, breaker_type: &str) -> StoreResult<Option<BreakerStatus>> {
        let row = sqlx::query(
            "SELECT breaker_type, state, failure_count, success_count, last_state_change,
                    last_failure_time, last_success_time, config, created_time, updated_time
             FROM circuit_break_status WHERE breaker_type = ?1",
        )
        .bind(breaker_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err("load_breaker"))?;

        row.map(row_to_breaker).transpose()
    }

    /// Insert the initial row for a breaker resource if it doesn't yet
    /// exist, starting `closed` with zeroed counters.
    pub async fn init_breaker(&self, breaker_type: &str, config: BreakerConfig) -> StoreResult<()> {
        let now = now_unix() as f64;
        let config_json =
            serde_json::to_string(&config).map_err(StoreError::CorruptConfig)?;
        sqlx::query(
            "INSERT INTO circuit_break_status
                (breaker_type, state, failure_count, success_count, last_state_change,
                 last_failure_time, last_success_time, config, created_time, updated_time)
             VALUES (?1, 'closed', 0, 0, ?2, 0, 0, ?3, ?2, ?2)
             ON CONFLICT (breaker_type) DO NOTHING",
        )
        .bind(breaker_type)
        .bind(now)
        .bind(config_json)
        .execute(&self.pool)
        .await
        .map_err(query_err("init_breaker"))?;
        Ok(())
    }

    /// Persist a full breaker status snapshot (§4.5 keeps breaker state in
    /// the same store as tasks, behind the same transaction primitives).
    pub async fn save_breaker(&self, status: &BreakerStatus) -> StoreResult<()> {
        let config_json =
            serde_json::to_string(&status.config).map_err(StoreError::CorruptConfig)?;
        sqlx::query(
            "UPDATE circuit_break_status
             SET state = ?1, failure_count = ?2, success_count = ?3, last_state_change = ?4,
                 last_failure_time = ?5, last_success_time = ?6, config = ?7, updated_time = ?8
             WHERE breaker_type = ?9",
        )
        .bind(status.state.as_str())
        .bind(status.failure_count)
        .bind(status.success_count)
        .bind(status.last_state_change as f64)
        .bind(status.last_failure_time as f64)
        .bind(status.last_success_time as f64)
        .bind(config_json)
        .bind(now_unix() as f64)
        .bind(&status.breaker_type)
        .execute(&self.pool)
        .await
        .map_err(query_err("save_breaker"))?;
        Ok(())
    }
}

fn row_to_task(row: sqlx::sqlite::SqliteRow) -> StoreResult<Task> {
    let raw_type: String = row.try_get("task_type").map_err(query_err("decode_task"))?;
    let raw_status: String = row.try_get("status").map_err(query_err("decode_task"))?;
    Ok(Task {
        torrent_hash: row.try_get("torrent_hash").map_err(query_err("decode_task"))?,
        task_type: TaskType::from_str(&raw_type)?,
        status: TaskStatus::from_str(&raw_status)?,
        retry_count: row
            .try_get::<i64, _>("retry_count")
            .map_err(query_err("decode_task"))? as u32,
        last_attempt: row.try_get::<f64, _>("last_attempt").map_err(query_err("decode_task"))? as i64,
        next_retry: row.try_get::<f64, _>("next_retry").map_err(query_err("decode_task"))? as i64,
        failure_reason: row
            .try_get("failure_reason")
            .map_err(query_err("decode_task"))?,
        created_time: row.try_get::<f64, _>("created_time").map_err(query_err("decode_task"))? as i64,
        updated_time: row.try_get::<f64, _>("updated_time").map_err(query_err("decode_task"))? as i64,
    })
}

fn row_to_breaker(row: sqlx::sqlite::SqliteRow) -> StoreResult<BreakerStatus> {
    let raw_state: String = row.try_get("state").map_err(query_err("decode_breaker"))?;
    let config_json: String = row.try_get("config").map_err(query_err("decode_breaker"))?;
    Ok(BreakerStatus {
        breaker_type: row
            .try_get("breaker_type")
            .map_err(query_err("decode_breaker"))?,
        state: BreakerState::from_str(&raw_state)?,
        failure_count: row
            .try_get::<i64, _>("failure_count")
            .map_err(query_err("decode_breaker"))? as u32,
        success_count: row
            .try_get::<i64, _>("success_count")
            .map_err(query_err("decode_breaker"))? as u32,
        last_state_change: row
            .try_get::<f64, _>("last_state_change")
            .map_err(query_err("decode_breaker"))? as i64,
        last_failure_time: row
            .try_get::<f64, _>("last_failure_time")
            .map_err(query_err("decode_breaker"))? as i64,
        last_success_time: row
            .try_get::<f64, _>("last_success_time")
            .map_err(query_err("decode_breaker"))? as i64,
        config: serde_json::from_str(&config_json).map_err(StoreError::CorruptConfig)?,
        created_time: row
            .try_get::<f64, _>("created_time")
            .map_err(query_err("decode_breaker"))? as i64,
        updated_time: row
            .try_get::<f64, _>("updated_time")
            .map_err(query_err("decode_breaker"))? as i64,
    })
}

/// Operational snapshot returned by [`WardenStore::stats`].
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Total number of task rows currently stored.
    pub total: u64,
    /// Row count broken down by `status`.
    pub by_status: HashMap<String, u64>,
}
