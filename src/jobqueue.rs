use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::job::{purchase_reference, Job, JobId, JobStatus, QueueStats};
use crate::scheduler::RetryScheduler;
use crate::storage::{Result, Storage};

/// Lifecycle operations on print jobs. Cheap to clone; the inbound listener
/// and the worker each hold one.
#[derive(Clone)]
pub struct JobQueue {
    storage: Arc<dyn Storage>,
    retry: RetryScheduler,
    wakeup: Arc<Notify>,
}

impl JobQueue {
    pub fn new(storage: Arc<dyn Storage>, retry: RetryScheduler) -> Self {
        Self {
            storage,
            retry,
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn retry_policy(&self) -> RetryScheduler {
        self.retry
    }

    /// Signalled on every enqueue and replay, so an idle worker does not
    /// have to wait out its poll interval.
    pub(crate) fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Persist a purchase record as a new pending job.
    pub async fn enqueue(&self, payload: Value) -> Result<JobId> {
        let reference = purchase_reference(&payload);
        let id = self.storage.insert(payload).await?;
        info!(job_id = %id, purchase = %reference, "Added job to queue");
        self.wakeup.notify_one();
        Ok(id)
    }

    /// Oldest pending job that still has attempts left. Does not claim it.
    pub async fn next_eligible(&self) -> Result<Option<Job>> {
        self.storage.select_oldest_pending(self.retry.max_attempts()).await
    }

    /// Mark a job as printed. Completing an already resolved job changes nothing.
    pub async fn complete(&self, id: JobId) -> Result<()> {
        let now = Utc::now();
        let updated = self
            .storage
            .update(id, Box::new(move |job: &mut Job| job.mark_completed(now)))
            .await?;

        if updated.changed {
            info!(job_id = %id, attempts = updated.job.attempts, "Job completed successfully");
        } else {
            debug!(job_id = %id, status = %updated.job.status, "Job already resolved, completion ignored");
        }
        Ok(())
    }

    /// Record a failed attempt. Returns the job's status afterwards:
    /// `Pending` while attempts remain, `Failed` once the budget is spent.
    pub async fn fail_retry(&self, id: JobId, error: &str) -> Result<JobStatus> {
        let now = Utc::now();
        let policy = self.retry;
        let max_attempts = policy.max_attempts();
        let message = error.to_string();
        let updated = self
            .storage
            .update(
                id,
                Box::new(move |job: &mut Job| job.mark_failed_attempt(message, now, &policy)),
            )
            .await?;

        let job = &updated.job;
        if !updated.changed {
            debug!(job_id = %id, status = %job.status, "Job already resolved, failure ignored");
        } else if job.status == JobStatus::Failed {
            error!(
                job_id = %id,
                attempts = job.attempts,
                error = %error,
                "Job failed permanently after {max_attempts} attempts"
            );
        } else {
            warn!(
                job_id = %id,
                attempts = job.attempts,
                max_attempts,
                error = %error,
                "Job failed, will retry"
            );
        }
        Ok(job.status)
    }

    /// Move pending jobs that can never become eligible under the current
    /// budget to `failed`, where `replay` can reach them. Returns their ids.
    pub async fn park_exhausted(&self) -> Result<Vec<JobId>> {
        let policy = self.retry;
        let mut parked = Vec::new();
        for job in self.storage.list_all_pending().await? {
            if !policy.is_exhausted(job.attempts) {
                continue;
            }
            let updated = self
                .storage
                .update(job.id, Box::new(move |job: &mut Job| job.mark_exhausted(&policy)))
                .await?;
            if updated.changed {
                warn!(
                    job_id = %job.id,
                    attempts = updated.job.attempts,
                    max_attempts = policy.max_attempts(),
                    "Pending job is over the retry budget, marked failed"
                );
                parked.push(job.id);
            }
        }
        Ok(parked)
    }

    /// Return a failed job to the pending pool with a fresh retry budget.
    /// Returns false if the job was not in the failed state.
    pub async fn replay(&self, id: JobId) -> Result<bool> {
        let updated = self
            .storage
            .update(id, Box::new(|job: &mut Job| job.mark_replayed()))
            .await?;

        if updated.changed {
            info!(job_id = %id, "Failed job replayed");
            self.wakeup.notify_one();
        }
        Ok(updated.changed)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.storage.get(id).await
    }

    pub async fn pending(&self) -> Result<Vec<Job>> {
        self.storage.list_all_pending().await
    }

    pub async fn list(&self, status: JobStatus, limit: u32) -> Result<Vec<Job>> {
        self.storage.list_by_status(status, limit).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.storage.stats().await
    }
}
