use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::jobqueue::JobQueue;

/// Inbound purchase events. The handler only enqueues; printing happens on
/// the worker, so the till gets its answer as soon as the job is durable.
pub fn router(queue: JobQueue) -> Router {
    Router::new().route("/purchase", post(purchase)).with_state(queue)
}

async fn purchase(State(queue): State<JobQueue>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let payload = match body {
        Ok(Json(payload)) if payload.is_object() => payload,
        Ok(_) => return bad_request("purchase record must be a JSON object".to_string()),
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    match queue.enqueue(payload).await {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({ "job_id": id }))).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to enqueue purchase");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

fn bad_request(reason: String) -> Response {
    warn!(reason = %reason, "Rejected purchase event");
    (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
}
