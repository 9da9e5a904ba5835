use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::scheduler::RetryScheduler;

/// Unique, monotonically assigned identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed,
    /// Retry budget exhausted. Only `replay` brings the job back.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(JobStatus::Pending),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchase record waiting to be printed, plus its retry bookkeeping
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub payload: Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// The purchase id carried in the payload, used to correlate log lines
    /// with the till that produced the event.
    pub fn reference(&self) -> String {
        purchase_reference(&self.payload)
    }

    /// Record a successful render. Returns false when the job was already
    /// resolved, in which case nothing changes.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.attempts += 1;
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        true
    }

    /// Record a failed render and park the job once the retry budget is spent.
    /// Returns false when the job was no longer pending.
    pub fn mark_failed_attempt(&mut self, error: String, now: DateTime<Utc>, policy: &RetryScheduler) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.attempts += 1;
        self.last_error = Some(error);
        self.last_attempt_at = Some(now);
        if policy.is_exhausted(self.attempts) {
            self.status = JobStatus::Failed;
        }
        true
    }

    /// Park a pending job whose attempts already meet the budget, which
    /// happens when the budget was lowered between runs.
    pub fn mark_exhausted(&mut self, policy: &RetryScheduler) -> bool {
        if self.status.is_terminal() || !policy.is_exhausted(self.attempts) {
            return false;
        }
        self.status = JobStatus::Failed;
        true
    }

    /// Put a parked job back into the pending pool with a fresh budget.
    /// `created_at` is kept, so the job regains its original queue position.
    pub fn mark_replayed(&mut self) -> bool {
        if self.status != JobStatus::Failed {
            return false;
        }
        self.status = JobStatus::Pending;
        self.attempts = 0;
        true
    }
}

/// The `id` field of a purchase record, or `-` when absent.
pub fn purchase_reference(payload: &Value) -> String {
    match payload.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "-".to_string(),
    }
}

/// Job counts for the dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
}
