pub mod cache;
pub mod config;
pub mod crawler;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod server;
pub mod stream;
pub mod worker;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::UrlCache;
use crate::config::Config;
use crate::crawler::fetcher::RateLimitedFetcher;
use crate::registry::JobRegistry;

/// Shared application state passed to all Axum handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let cache = UrlCache::shared();
        let fetcher = Arc::new(RateLimitedFetcher::new());
        let max_concurrent_jobs = config.max_concurrent_jobs;
        let job_retention_secs = config.job_retention_secs;
        AppState {
            config,
            registry: JobRegistry::shared(cache, fetcher, max_concurrent_jobs, job_retention_secs),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    // CORS layer — permissive for the internal service
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Every job route is scoped to the caller's anonymous identity.
    let job_routes = Router::new()
        .route("/api/v1/jobs", post(server::routes::create_job))
        .route("/api/v1/jobs/active", get(server::routes::list_active_jobs))
        .route(
            "/api/v1/jobs/{id}",
            get(server::routes::get_job).delete(server::routes::cancel_job),
        )
        .route("/api/v1/jobs/{id}/stream", get(server::routes::stream_job))
        .route(
            "/api/v1/jobs/{id}/download",
            get(server::routes::download_job),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            server::auth::anonymous_identity,
        ));

    // Public routes (no identity required)
    let public_routes = Router::new().route("/api/v1/health", get(server::routes::health));

    Router::new()
        .merge(job_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
