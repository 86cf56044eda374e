// SQLite-backed job ledger.
//
// Tables:
// - moderation_jobs: one row per moderation attempt, never deleted
//
// Timestamps are fixed-width RFC 3339 (microseconds, `Z`) so they sort as text.

use crate::core::moderation::{
    JobStatus, JobStore, ModerationJob, StoreError, TargetRef, TargetType,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteJobStore {
    pool: Pool<Sqlite>,
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

impl SqliteJobStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_type TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'Pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_moderation_jobs_target
                ON moderation_jobs(target_type, target_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_moderation_jobs_status
                ON moderation_jobs(status, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    fn map_row(row: &SqliteRow) -> Result<ModerationJob, StoreError> {
        let target_type: String = row.get("target_type");
        let status: String = row.get("status");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(ModerationJob {
            id: row.get("id"),
            target: TargetRef::new(
                target_type
                    .parse::<TargetType>()
                    .map_err(StoreError::Corrupt)?,
                row.get("target_id"),
            ),
            status: status.parse::<JobStatus>().map_err(StoreError::Corrupt)?,
            attempts: row.get::<i64, _>("attempts") as u32,
            last_error: row.get("last_error"),
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }

    async fn set_status(&self, job_id: i64, status: JobStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE moderation_jobs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(format_timestamp(Utc::now()))
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn fetch_job(&self, job_id: i64) -> Result<ModerationJob, StoreError> {
        let row = sqlx::query("SELECT * FROM moderation_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::NotFound)?;
        Self::map_row(&row)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, target: TargetRef) -> Result<ModerationJob, StoreError> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO moderation_jobs (target_type, target_id, status, attempts, created_at, updated_at)
            VALUES (?, ?, 'Pending', 0, ?, ?)
            "#,
        )
        .bind(target.target_type.as_str())
        .bind(target.target_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.fetch_job(result.last_insert_rowid()).await
    }

    async fn latest_job(&self, target: TargetRef) -> Result<Option<ModerationJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM moderation_jobs
            WHERE target_type = ? AND target_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(target.target_type.as_str())
        .bind(target.target_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn mark_processing(&self, job_id: i64) -> Result<(), StoreError> {
        self.set_status(job_id, JobStatus::Processing).await
    }

    async fn mark_done(&self, job_id: i64) -> Result<(), StoreError> {
        self.set_status(job_id, JobStatus::Done).await
    }

    async fn mark_error(&self, job_id: i64, error: &str) -> Result<u32, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE moderation_jobs
            SET status = 'Error', attempts = attempts + 1, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(format_timestamp(Utc::now()))
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        // Get the updated count
        let row = sqlx::query("SELECT attempts FROM moderation_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.get::<i64, _>("attempts") as u32)
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<ModerationJob>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT * FROM moderation_jobs
                    WHERE status = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM moderation_jobs
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn jobs_for_target(&self, target: TargetRef) -> Result<Vec<ModerationJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM moderation_jobs
            WHERE target_type = ? AND target_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(target.target_type.as_str())
        .bind(target.target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::database::connect_sqlite;

    async fn store() -> SqliteJobStore {
        let pool = connect_sqlite("sqlite::memory:").await.unwrap();
        let store = SqliteJobStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_job_starts_pending() {
        let store = store().await;
        let target = TargetRef::new(TargetType::Review, 10);

        let job = store.create_job(target).await.unwrap();

        assert_eq!(job.target, target);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = store().await;
        store.migrate().await.unwrap();
        store
            .create_job(TargetRef::new(TargetType::Review, 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_latest_job_is_most_recently_created() {
        let store = store().await;
        let target = TargetRef::new(TargetType::EventReview, 3);
        let other = TargetRef::new(TargetType::Review, 3);

        let first = store.create_job(target).await.unwrap();
        let second = store.create_job(target).await.unwrap();
        store.create_job(other).await.unwrap();

        let latest = store.latest_job(target).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        let history = store.jobs_for_target(target).await.unwrap();
        assert_eq!(
            history.iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        assert!(store
            .latest_job(TargetRef::new(TargetType::Review, 99))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_status_transitions_and_attempts() {
        let store = store().await;
        let job = store
            .create_job(TargetRef::new(TargetType::Review, 4))
            .await
            .unwrap();

        store.mark_processing(job.id).await.unwrap();
        assert_eq!(store.fetch_job(job.id).await.unwrap().status, JobStatus::Processing);

        assert_eq!(store.mark_error(job.id, "request timed out").await.unwrap(), 1);
        assert_eq!(store.mark_error(job.id, "HTTP error").await.unwrap(), 2);
        let failed = store.fetch_job(job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.attempts, 2);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP error"));

        store.mark_done(job.id).await.unwrap();
        let done = store.fetch_job(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.attempts, 2);
        assert!(done.updated_at >= failed.updated_at);
    }

    #[tokio::test]
    async fn test_updates_on_missing_rows_report_not_found() {
        let store = store().await;

        assert!(matches!(
            store.mark_done(404).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.mark_error(404, "x").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_jobs_filters_and_limits() {
        let store = store().await;
        let a = store
            .create_job(TargetRef::new(TargetType::Review, 1))
            .await
            .unwrap();
        let b = store
            .create_job(TargetRef::new(TargetType::Review, 2))
            .await
            .unwrap();
        store
            .create_job(TargetRef::new(TargetType::EventReview, 1))
            .await
            .unwrap();
        store.mark_error(a.id, "boom").await.unwrap();
        store.mark_done(b.id).await.unwrap();

        let errors = store.list_jobs(Some(JobStatus::Error), 10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, a.id);

        let pending = store.list_jobs(Some(JobStatus::Pending), 10).await.unwrap();
        assert_eq!(pending.len(), 1);

        assert_eq!(store.list_jobs(None, 10).await.unwrap().len(), 3);
        assert_eq!(store.list_jobs(None, 2).await.unwrap().len(), 2);
    }
}
