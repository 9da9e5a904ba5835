pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use crate::job::{Job, JobId, JobStatus, QueueStats};

pub use sqlite::SqliteStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Job {0} not found")]
    NotFound(JobId),
    #[error("Corrupt job row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// In-place edit applied to a stored job. Returns false to leave the row untouched.
pub type Mutator = Box<dyn FnOnce(&mut Job) -> bool + Send>;

/// Outcome of [`Storage::update`]
#[derive(Debug, Clone)]
pub struct Updated {
    pub job: Job,
    pub changed: bool,
}

/// Durable job records. Every mutation goes through `update`, which the
/// implementation must run atomically.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert(&self, payload: Value) -> Result<JobId>;
    async fn update(&self, id: JobId, mutator: Mutator) -> Result<Updated>;
    async fn select_oldest_pending(&self, max_attempts: u32) -> Result<Option<Job>>;
    async fn list_all_pending(&self) -> Result<Vec<Job>>;
    async fn get(&self, id: JobId) -> Result<Option<Job>>;
    async fn list_by_status(&self, status: JobStatus, limit: u32) -> Result<Vec<Job>>;
    async fn stats(&self) -> Result<QueueStats>;
}
