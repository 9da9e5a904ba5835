use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::job::{Job, JobId, JobStatus, QueueStats};

use super::{Mutator, Result, Storage, StorageError, Updated};

const JOB_COLUMNS: &str =
    "id, payload, status, attempts, created_at, last_attempt_at, last_error, completed_at";

pub struct SqliteStorage {
    pub pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `database_url`, e.g.
    /// `sqlite://spool.db`.
    pub async fn new(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    /// A private database living as long as the storage. Pinned to a single
    /// connection, since every sqlite memory connection is its own database.
    pub async fn in_memory() -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_attempt_at TEXT,
                last_error TEXT,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_job(row: &SqliteRow) -> Result<Job> {
        let id: i64 = row.try_get("id")?;
        let payload: String = row.try_get("payload")?;
        let status: String = row.try_get("status")?;
        let attempts: i64 = row.try_get("attempts")?;
        let created_at: String = row.try_get("created_at")?;
        let last_attempt_at: Option<String> = row.try_get("last_attempt_at")?;
        let last_error: Option<String> = row.try_get("last_error")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;

        let status = JobStatus::from_db(&status)
            .ok_or_else(|| StorageError::Corrupt(format!("job {id} has unknown status {status:?}")))?;

        Ok(Job {
            id: JobId(id),
            payload: serde_json::from_str(&payload)?,
            status,
            attempts: u32::try_from(attempts)
                .map_err(|_| StorageError::Corrupt(format!("job {id} has attempts {attempts}")))?,
            created_at: parse_timestamp(id, &created_at)?,
            last_attempt_at: last_attempt_at.map(|s| parse_timestamp(id, &s)).transpose()?,
            last_error,
            completed_at: completed_at.map(|s| parse_timestamp(id, &s)).transpose()?,
        })
    }

    async fn fetch_job(conn: &mut SqliteConnection, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn write_job(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, attempts = ?, last_attempt_at = ?, last_error = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(i64::from(job.attempts))
        .bind(job.last_attempt_at.map(format_timestamp))
        .bind(job.last_error.as_deref())
        .bind(job.completed_at.map(format_timestamp))
        .bind(job.id.0)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn apply(conn: &mut SqliteConnection, id: JobId, mutator: Mutator) -> Result<Updated> {
        let mut job = Self::fetch_job(conn, id).await?.ok_or(StorageError::NotFound(id))?;
        let changed = mutator(&mut job);
        if changed {
            Self::write_job(conn, &job).await?;
        }
        Ok(Updated { job, changed })
    }
}

/// Fixed-width UTC text so that lexical order in SQL matches time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: i64, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("job {id} has bad timestamp {value:?}: {e}")))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert(&self, payload: Value) -> Result<JobId> {
        let payload = serde_json::to_string(&payload)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (payload, status, attempts, created_at)
            VALUES (?, 'pending', 0, ?)
            RETURNING id
            "#,
        )
        .bind(payload)
        .bind(format_timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        Ok(JobId(id))
    }

    async fn update(&self, id: JobId, mutator: Mutator) -> Result<Updated> {
        // IMMEDIATE takes the write lock up front, so a concurrent insert
        // cannot invalidate the snapshot between our read and our write.
        // Dropping the transaction uncommitted rolls it back.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let updated = Self::apply(&mut tx, id, mutator).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn select_oldest_pending(&self, max_attempts: u32) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'pending' AND attempts < ?
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#
        ))
        .bind(i64::from(max_attempts))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list_all_pending(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_job(&mut conn, id).await
    }

    async fn list_by_status(&self, status: JobStatus, limit: u32) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let n = n.max(0) as u64;
            match JobStatus::from_db(&status) {
                Some(JobStatus::Pending) => stats.pending = n,
                Some(JobStatus::Completed) => stats.completed = n,
                Some(JobStatus::Failed) => stats.failed = n,
                None => return Err(StorageError::Corrupt(format!("unknown status {status:?}"))),
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RetryScheduler;
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let a = storage.insert(json!({ "id": 1 })).await.unwrap();
        let b = storage.insert(json!({ "id": 2 })).await.unwrap();
        assert!(b > a);

        let job = storage.get(a).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.payload, json!({ "id": 1 }));
    }

    #[tokio::test]
    async fn payload_is_stored_verbatim() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let payload = json!({
            "id": 62,
            "total": "3.50",
            "purchasedItems": [{ "item": { "name": "Caffè", "price": 1.2 }, "quantity": 2 }],
            "change": null
        });
        let id = storage.insert(payload.clone()).await.unwrap();
        assert_eq!(storage.get(id).await.unwrap().unwrap().payload, payload);
    }

    #[tokio::test]
    async fn update_skips_write_when_mutator_declines() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let id = storage.insert(json!({})).await.unwrap();

        let updated = storage
            .update(id, Box::new(|job: &mut Job| {
                job.attempts = 9;
                false
            }))
            .await
            .unwrap();
        assert!(!updated.changed);
        assert_eq!(storage.get(id).await.unwrap().unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let err = storage.update(JobId(404), Box::new(|_: &mut Job| true)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(JobId(404))));

        // the connection is usable again after the rollback
        let id = storage.insert(json!({})).await.unwrap();
        let updated = storage
            .update(id, Box::new(|job: &mut Job| {
                job.attempts = 2;
                true
            }))
            .await
            .unwrap();
        assert!(updated.changed);
        assert_eq!(storage.get(id).await.unwrap().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn oldest_pending_skips_exhausted_and_resolved_jobs() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let exhausted = storage.insert(json!({ "n": 1 })).await.unwrap();
        let done = storage.insert(json!({ "n": 2 })).await.unwrap();
        let next = storage.insert(json!({ "n": 3 })).await.unwrap();

        storage
            .update(exhausted, Box::new(|job: &mut Job| {
                job.attempts = 3;
                true
            }))
            .await
            .unwrap();
        storage
            .update(done, Box::new(|job: &mut Job| job.mark_completed(Utc::now())))
            .await
            .unwrap();

        let job = storage.select_oldest_pending(3).await.unwrap().unwrap();
        assert_eq!(job.id, next);
        assert_eq!(storage.list_all_pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stats_count_each_status() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let a = storage.insert(json!({})).await.unwrap();
        let b = storage.insert(json!({})).await.unwrap();
        storage.insert(json!({})).await.unwrap();

        storage.update(a, Box::new(|job: &mut Job| job.mark_completed(Utc::now()))).await.unwrap();
        storage
            .update(b, Box::new(|job: &mut Job| job.mark_failed_attempt("x".into(), Utc::now(), &RetryScheduler::new(1, Duration::ZERO))))
            .await
            .unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats, QueueStats { pending: 1, completed: 1, failed: 1 });
        assert_eq!(storage.list_by_status(JobStatus::Failed, 10).await.unwrap()[0].id, b);
    }
}
