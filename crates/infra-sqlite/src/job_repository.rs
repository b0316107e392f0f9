// SQLite JobRepository Implementation

use crate::run_migrations;
use async_trait::async_trait;
use quern_core::domain::{JobRecord, JobState, Priority};
use quern_core::error::{Error, Result};
use quern_core::port::JobRepository;
use sqlx::SqlitePool;
use tracing::warn;

// Helper to convert sqlx::Error to Error with structured information
fn map_sqlx_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code.as_ref() {
                    "2067" | "1555" => {
                        // UNIQUE constraint failed
                        Error::Conflict(format!("insert collision: {}", db_err.message()))
                    }
                    "5" => {
                        // SQLITE_BUSY - database is locked
                        Error::Storage(format!("database locked: {}", db_err.message()))
                    }
                    "13" => {
                        // SQLITE_FULL - database or disk is full
                        Error::Storage(format!("database full: {}", db_err.message()))
                    }
                    code => {
                        Error::Storage(format!("database error [{}]: {}", code, db_err.message()))
                    }
                }
            } else {
                Error::Storage(format!("database error: {}", db_err.message()))
            }
        }
        _ => Error::Storage(err.to_string()),
    }
}

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn init(&self) -> Result<()> {
        run_migrations(&self.pool).await
    }

    async fn list(&self, state: Option<JobState>) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRow> = match state {
            Some(state) => {
                sqlx::query_as(
                    "SELECT * FROM jobs WHERE state = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(state.to_string())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as("SELECT * FROM jobs ORDER BY created_at ASC, id ASC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(JobRow::into_record).collect())
    }

    async fn find(&self, id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(JobRow::into_record))
    }

    async fn find_next_inactive_by_type(&self, job_type: &str) -> Result<Option<JobRecord>> {
        // The id tie-break keeps repeated calls stable under equal
        // priority and created_at
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE job_type = ? AND state = ?
            ORDER BY priority ASC, created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(job_type)
        .bind(JobState::Inactive.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(JobRow::into_record))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count > 0)
    }

    async fn insert(&self, record: &JobRecord) -> Result<()> {
        let logs = serde_json::to_string(&record.logs)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, priority, data, state,
                created_at, updated_at, started_at, completed_at, failed_at,
                duration, progress, logs
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.job_type)
        .bind(record.priority.as_i32())
        .bind(record.data.to_string())
        .bind(record.state.to_string())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.failed_at)
        .bind(record.duration)
        .bind(record.progress.map(i64::from))
        .bind(logs)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update(&self, record: &JobRecord) -> Result<()> {
        let logs = serde_json::to_string(&record.logs)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET priority = ?, data = ?, state = ?, updated_at = ?,
                started_at = ?, completed_at = ?, failed_at = ?,
                duration = ?, progress = ?, logs = ?
            WHERE id = ?
            "#,
        )
        .bind(record.priority.as_i32())
        .bind(record.data.to_string())
        .bind(record.state.to_string())
        .bind(record.updated_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.failed_at)
        .bind(record.duration)
        .bind(record.progress.map(i64::from))
        .bind(logs)
        .bind(&record.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() != 1 {
            return Err(Error::Storage(format!(
                "update affected {} rows for job {}",
                result.rows_affected(),
                record.id
            )));
        }
        Ok(())
    }

    async fn update_from_state(&self, record: &JobRecord, expected: JobState) -> Result<()> {
        let logs = serde_json::to_string(&record.logs)?;

        // Conditional update: a stale copy cannot overwrite a row that has
        // moved on (e.g. a terminal write after shutdown already failed it)
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET priority = ?, data = ?, state = ?, updated_at = ?,
                started_at = ?, completed_at = ?, failed_at = ?,
                duration = ?, progress = ?, logs = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(record.priority.as_i32())
        .bind(record.data.to_string())
        .bind(record.state.to_string())
        .bind(record.updated_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.failed_at)
        .bind(record.duration)
        .bind(record.progress.map(i64::from))
        .bind(logs)
        .bind(&record.id)
        .bind(expected.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() != 1 {
            return Err(Error::Conflict(format!(
                "job {} was removed or is no longer {}",
                record.id, expected
            )));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    priority: i32,
    data: String,
    state: String,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    failed_at: Option<i64>,
    duration: Option<i64>,
    progress: Option<i64>,
    logs: String,
}

impl JobRow {
    fn into_record(self) -> JobRecord {
        let state = match self.state.as_str() {
            "INACTIVE" => JobState::Inactive,
            "ACTIVE" => JobState::Active,
            "COMPLETE" => JobState::Complete,
            "FAILURE" => JobState::Failure,
            other => {
                warn!(job_id = %self.id, state = %other, "unknown job state in storage, treating as FAILURE");
                JobState::Failure
            }
        };

        let data = serde_json::from_str(&self.data).unwrap_or(serde_json::Value::Null);
        let logs = serde_json::from_str(&self.logs).unwrap_or_default();

        JobRecord {
            id: self.id,
            job_type: self.job_type,
            priority: Priority::sanitize(self.priority),
            data,
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            duration: self.duration,
            progress: self.progress.map(|p| p.clamp(0, 100) as u8),
            logs,
        }
    }
}
