mod templates;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, Redirect},
    routing::{get, post},
    Router,
};
use tracing::error;

use crate::job::{JobId, JobStatus};
use crate::jobqueue::JobQueue;
use crate::storage::StorageError;

const LIST_LIMIT: u32 = 100;

type PageResult<T> = Result<T, (StatusCode, String)>;

/// Operator pages over the job table, meant to be nested at `/dashboard`.
pub fn router(queue: JobQueue) -> Router {
    Router::new()
        .route("/", get(overview))
        .route("/jobs/pending", get(jobs_pending))
        .route("/jobs/completed", get(jobs_completed))
        .route("/jobs/failed", get(jobs_failed))
        .route("/jobs/{id}/replay", post(replay_job))
        .with_state(queue)
}

fn internal(e: StorageError) -> (StatusCode, String) {
    error!(error = %e, "Dashboard query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn overview(State(queue): State<JobQueue>) -> PageResult<Html<String>> {
    let stats = queue.stats().await.map_err(internal)?;
    Ok(Html(templates::render_overview(&stats)))
}

async fn list(queue: &JobQueue, status: JobStatus) -> PageResult<Html<String>> {
    let jobs = queue.list(status, LIST_LIMIT).await.map_err(internal)?;
    Ok(Html(templates::render_jobs(status, &jobs)))
}

async fn jobs_pending(State(queue): State<JobQueue>) -> PageResult<Html<String>> {
    list(&queue, JobStatus::Pending).await
}

async fn jobs_completed(State(queue): State<JobQueue>) -> PageResult<Html<String>> {
    list(&queue, JobStatus::Completed).await
}

async fn jobs_failed(State(queue): State<JobQueue>) -> PageResult<Html<String>> {
    list(&queue, JobStatus::Failed).await
}

async fn replay_job(State(queue): State<JobQueue>, Path(id): Path<i64>) -> PageResult<Redirect> {
    match queue.replay(JobId(id)).await {
        Ok(_) => Ok(Redirect::to("/dashboard/jobs/failed")),
        Err(StorageError::NotFound(id)) => Err((StatusCode::NOT_FOUND, format!("Job {id} not found"))),
        Err(e) => Err(internal(e)),
    }
}
