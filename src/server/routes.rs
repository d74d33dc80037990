use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

use crate::models::JobConfig;
use crate::registry::RegistryError;
use crate::server::auth::UserId;
use crate::AppState;

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match self {
            RegistryError::NotFound => StatusCode::NOT_FOUND,
            RegistryError::InvalidSeedUrl(_) | RegistryError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::TooManyJobs => StatusCode::TOO_MANY_REQUESTS,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub url: String,
    pub config: Option<JobConfig>,
}

/// POST /jobs
pub async fn create_job(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, RegistryError> {
    // A caller that omits `config` entirely gets the process's default
    // worker concurrency rather than the per-field serde default.
    let config = payload.config.unwrap_or_else(|| JobConfig {
        max_concurrent_requests: state.config.default_worker_concurrency,
        ..JobConfig::default()
    });

    let job = state.registry.create(user_id, payload.url, config).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job.job_id, "status": job.status })),
    ))
}

/// GET /jobs/active
pub async fn list_active_jobs(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
) -> impl IntoResponse {
    let jobs = state.registry.list_active(&user_id).await;
    Json(jobs)
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, RegistryError> {
    let job = state.registry.get(&job_id, &user_id).await?;
    Ok(Json(job))
}

/// DELETE /jobs/{id}
pub async fn cancel_job(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, RegistryError> {
    state.registry.cancel(&job_id, &user_id).await?;
    Ok(Json(json!({ "job_id": job_id, "status": "cancelled" })))
}

/// GET /jobs/{id}/download
pub async fn download_job(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(job_id): Path<String>,
) -> Result<Response, RegistryError> {
    use crate::registry::DownloadOutcome;
    match state.registry.download(&job_id, &user_id).await? {
        DownloadOutcome::Ready(markdown) => Ok((
            StatusCode::OK,
            [("content-type", "text/markdown; charset=utf-8")],
            markdown,
        )
            .into_response()),
        DownloadOutcome::NotReady => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "error": "job has not finished yet" })),
        )
            .into_response()),
        DownloadOutcome::NoContent => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no page cleared the quality threshold" })),
        )
            .into_response()),
    }
}

/// GET /jobs/{id}/stream
///
/// Server-sent events, resumable via the `Last-Event-ID` header.
pub async fn stream_job(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RegistryError> {
    let job_stream = state.registry.subscribe_stream(&job_id, &user_id).await?;

    let since = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let events = job_stream.subscribe(since).await;
    let sse_stream = events.map(|event| -> Result<Event, Infallible> {
        let data = serde_json::to_string(&event.payload).unwrap_or_default();
        Ok(Event::default()
            .id(event.event_id.to_string())
            .event(event.payload.type_name())
            .data(data))
    });

    let sse = Sse::new(sse_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );

    // axum's Sse sets content-type and a bare Cache-Control itself; layer on
    // the rest of spec §6's required stream headers (no-transform so
    // intermediary proxies don't buffer or re-encode the event framing).
    Ok((
        [
            ("cache-control", "no-cache, no-transform"),
            ("connection", "keep-alive"),
            ("x-accel-buffering", "no"),
        ],
        sse,
    ))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
