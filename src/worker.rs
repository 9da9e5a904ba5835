use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::DeviceConnector;
use crate::gate::RenderGate;
use crate::job::{Job, JobId, JobStatus};
use crate::jobqueue::JobQueue;
use crate::render::Renderer;

/// The single consumer of the queue. Owns the render gate, so nothing else
/// can reach the printer.
pub struct Worker<C: DeviceConnector, R> {
    queue: JobQueue,
    gate: RenderGate<C, R>,
    poll_interval: Duration,
    error_pause: Duration,
}

impl<C, R> Worker<C, R>
where
    C: DeviceConnector,
    C::Device: 'static,
    R: Renderer<C::Device> + 'static,
{
    pub fn new(queue: JobQueue, gate: RenderGate<C, R>) -> Self {
        Self {
            queue,
            gate,
            poll_interval: Duration::from_secs(5),
            error_pause: Duration::from_secs(5),
        }
    }

    /// Set the idle poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the pause after a storage error
    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    /// Drain startup recovery, then poll until shutdown is signaled
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(device = %self.gate.describe(), "Worker started");
        self.recover(&shutdown).await;

        let wakeup = self.queue.wakeup();
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.queue.next_eligible().await {
                Ok(Some(job)) => {
                    self.process(job, &shutdown).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = wakeup.notified() => debug!("Woken by new job"),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to fetch next job");
                    if !self.pause(&shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Worker shutting down");
    }

    /// Process every job left pending by a previous run before normal
    /// polling starts. Returns how many jobs were processed.
    pub async fn recover(&mut self, shutdown: &CancellationToken) -> usize {
        if let Err(e) = self.queue.park_exhausted().await {
            warn!(error = %e, "Could not park jobs over the retry budget");
        }

        match self.queue.pending().await {
            Ok(jobs) if jobs.is_empty() => debug!("No pending jobs from a previous run"),
            Ok(jobs) => {
                let ids: Vec<String> = jobs.iter().map(|job| job.id.to_string()).collect();
                info!(count = jobs.len(), jobs = %ids.join(","), "Recovering pending jobs");
            }
            Err(e) => warn!(error = %e, "Could not list pending jobs"),
        }

        let mut processed = 0;
        while !shutdown.is_cancelled() {
            match self.queue.next_eligible().await {
                Ok(Some(job)) => {
                    self.process(job, shutdown).await;
                    processed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to fetch job during recovery");
                    if !self.pause(shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(processed, "Startup recovery finished");
        processed
    }

    /// Try one job until it prints or its retry budget is spent, backing off
    /// between attempts. Every failed attempt is persisted before the wait.
    /// Returns the job's final status, `Pending` when interrupted by shutdown.
    pub async fn process(&mut self, job: Job, shutdown: &CancellationToken) -> JobStatus {
        let policy = self.queue.retry_policy();
        let reference = job.reference();
        let mut attempts = job.attempts;

        loop {
            debug!(
                job_id = %job.id,
                purchase = %reference,
                attempt = attempts + 1,
                remaining = policy.remaining(attempts),
                "Printing receipt"
            );

            let status = match self.gate.attempt(&job.payload).await {
                Ok(()) => {
                    return if self.complete(job.id, shutdown).await {
                        JobStatus::Completed
                    } else {
                        JobStatus::Pending
                    };
                }
                Err(e) => match self.fail_retry(job.id, &e.to_string(), shutdown).await {
                    Some(status) => status,
                    None => return JobStatus::Pending,
                },
            };
            attempts += 1;

            if status != JobStatus::Pending {
                return status;
            }

            let delay = policy.delay_for(attempts - 1);
            debug!(job_id = %job.id, ?delay, "Backing off before retry");
            tokio::select! {
                _ = shutdown.cancelled() => return JobStatus::Pending,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Storage errors are retried on the same operation, so a receipt that
    /// already printed is not printed again just because the write failed.
    async fn complete(&mut self, id: JobId, shutdown: &CancellationToken) -> bool {
        loop {
            match self.queue.complete(id).await {
                Ok(()) => return true,
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to mark job completed");
                    if !self.pause(shutdown).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn fail_retry(&mut self, id: JobId, reason: &str, shutdown: &CancellationToken) -> Option<JobStatus> {
        loop {
            match self.queue.fail_retry(id, reason).await {
                Ok(status) => return Some(status),
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to record job failure");
                    if !self.pause(shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for the error pause. Returns false if shutdown came first.
    async fn pause(&mut self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.error_pause) => true,
        }
    }
}
