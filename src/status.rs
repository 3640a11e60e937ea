//! Durable run state kept in the `registry` table.
//!
//! The run lock, the last completed run and per-job progress live here so
//! that they survive restarts and are visible to every process sharing the
//! database.
//!
//! Lock acquisition is check-then-set: two processes starting within the
//! same instant can both see the lock free. Runs are triggered by cron or an
//! operator, so this window is accepted.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::IndexError;

const LOCK_KEY: &str = "indexer.lock";
const LAST_RUN_KEY: &str = "indexer.last_run";
const CLEANUP_KEY: &str = "indexer.status.cleanup";
const JOB_KEY_PREFIX: &str = "indexer.status.job.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct LockValue {
    started_at: i64,
}

/// Start, end and duration (seconds) of the last completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// A lock older than the staleness window was cleared and taken over.
    Reclaimed { previous_start: i64 },
    /// Another run holds a fresh lock. Nothing was changed.
    Held { since: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Running { current: usize, total: usize },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub state: JobState,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct RunStatus {
    pool: SqlitePool,
}

impl RunStatus {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Start time of the run holding the lock, if any.
    pub async fn lock_time(&self) -> Result<Option<i64>, IndexError> {
        Ok(self
            .read::<LockValue>(LOCK_KEY)
            .await?
            .map(|lock| lock.started_at))
    }

    pub async fn try_acquire(&self, now: i64, stale_after_secs: i64) -> Result<LockAttempt, IndexError> {
        let attempt = match self.lock_time().await? {
            None => LockAttempt::Acquired,
            Some(since) if since < now - stale_after_secs => LockAttempt::Reclaimed {
                previous_start: since,
            },
            Some(since) => return Ok(LockAttempt::Held { since }),
        };
        self.write(LOCK_KEY, &LockValue { started_at: now }, now)
            .await?;
        Ok(attempt)
    }

    pub async fn release(&self) -> Result<bool, IndexError> {
        self.remove(LOCK_KEY).await
    }

    pub async fn last_run(&self) -> Result<Option<LastRun>, IndexError> {
        self.read(LAST_RUN_KEY).await
    }

    /// Start time of the last completed run, `0` when there was none.
    pub async fn last_run_start_time(&self) -> Result<i64, IndexError> {
        Ok(self.last_run().await?.map(|r| r.start_time).unwrap_or(0))
    }

    pub async fn set_last_run(&self, run: &LastRun) -> Result<(), IndexError> {
        self.write(LAST_RUN_KEY, run, run.end_time).await
    }

    pub async fn set_job_status(&self, job_uid: i64, state: JobState, now: i64) -> Result<(), IndexError> {
        let status = JobStatus {
            state,
            updated_at: now,
        };
        self.write(&format!("{}{}", JOB_KEY_PREFIX, job_uid), &status, now)
            .await
    }

    pub async fn job_status(&self, job_uid: i64) -> Result<Option<JobStatus>, IndexError> {
        self.read(&format!("{}{}", JOB_KEY_PREFIX, job_uid)).await
    }

    pub async fn set_cleanup_status(&self, state: JobState, now: i64) -> Result<(), IndexError> {
        let status = JobStatus {
            state,
            updated_at: now,
        };
        self.write(CLEANUP_KEY, &status, now).await
    }

    pub async fn cleanup_status(&self) -> Result<Option<JobStatus>, IndexError> {
        self.read(CLEANUP_KEY).await
    }

    /// Forget every job and cleanup status.
    pub async fn clear_all(&self) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM registry WHERE key LIKE 'indexer.status.%'")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, IndexError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM registry WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T, now: i64) -> Result<(), IndexError> {
        let json = serde_json::to_string(value)?;
        sqlx::query(
            r#"
            INSERT INTO registry (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, IndexError> {
        let result = sqlx::query("DELETE FROM registry WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
