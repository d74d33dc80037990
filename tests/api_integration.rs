use axum::http::StatusCode;
use axum_test::{TestServer, TestServerConfig};
use doc_crawler::config::Config;
use doc_crawler::{build_app, AppState};
use serde_json::json;
use std::sync::Arc;

fn test_config() -> Config {
    Config {
        shared_secret: "test-secret".to_string(),
        bind_host: "0.0.0.0".to_string(),
        port: 8080,
        max_concurrent_jobs: 5,
        default_worker_concurrency: 3,
        job_retention_secs: 3600,
        anon_token_ttl_secs: 365 * 24 * 60 * 60,
    }
}

fn test_server() -> TestServer {
    let state = AppState::new(Arc::new(test_config()));
    let app = build_app(state);
    TestServer::new_with_config(
        app,
        TestServerConfig {
            save_cookies: true,
            ..Default::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn health_is_public_and_unauthenticated() {
    let server = test_server();
    let response = server.get("/api/v1/health").await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_job_rejects_ssrf_seed_url() {
    let server = test_server();
    let response = server
        .post("/api/v1/jobs")
        .json(&json!({ "url": "http://127.0.0.1/admin" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_job_rejects_out_of_range_config() {
    let server = test_server();
    let response = server
        .post("/api/v1/jobs")
        .json(&json!({
            "url": "https://example.com/docs",
            "config": { "max_concurrent_requests": 0 }
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_job_then_fetch_status_same_caller() {
    let server = test_server();

    let create = server
        .post("/api/v1/jobs")
        .json(&json!({
            "url": "https://example.com/docs",
            "config": {
                "max_depth": 0,
                "max_pages": 1,
                "respect_robots": false,
                "use_sitemap": false,
                "timeout_ms": 500
            }
        }))
        .await;
    create.assert_status(StatusCode::ACCEPTED);
    let body: serde_json::Value = create.json();
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "pending");

    // Same caller (cookie persisted by the test server) can fetch the job.
    let status = server.get(&format!("/api/v1/jobs/{job_id}")).await;
    status.assert_status(StatusCode::OK);
    let status_body: serde_json::Value = status.json();
    assert_eq!(status_body["job_id"], job_id);
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let server = test_server();
    // Force identity assignment first.
    server.get("/api/v1/jobs/active").await;

    let response = server.get("/api/v1/jobs/nonexistent-id").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cross_caller_access_is_not_found_not_forbidden() {
    let state = AppState::new(Arc::new(test_config()));

    let owner = TestServer::new_with_config(
        build_app(state.clone()),
        TestServerConfig {
            save_cookies: true,
            ..Default::default()
        },
    )
    .unwrap();
    let stranger = TestServer::new_with_config(
        build_app(state),
        TestServerConfig {
            save_cookies: true,
            ..Default::default()
        },
    )
    .unwrap();

    let create = owner
        .post("/api/v1/jobs")
        .json(&json!({
            "url": "https://example.com/docs",
            "config": { "max_depth": 0, "max_pages": 1, "use_sitemap": false }
        }))
        .await;
    create.assert_status(StatusCode::ACCEPTED);
    let job_id = create.json::<serde_json::Value>()["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    // `stranger` has its own cookie jar and never shared the owner's
    // signed identity token, so it mints a distinct anonymous user_id and
    // must see the job as absent rather than forbidden.
    let response = stranger.get(&format!("/api/v1/jobs/{job_id}")).await;
    response.assert_status(StatusCode::NOT_FOUND);

    let cancel = stranger.delete(&format!("/api/v1/jobs/{job_id}")).await;
    cancel.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_active_returns_only_callers_own_jobs() {
    let server = test_server();
    let create = server
        .post("/api/v1/jobs")
        .json(&json!({
            "url": "https://example.com/docs",
            "config": { "max_depth": 0, "max_pages": 1, "use_sitemap": false }
        }))
        .await;
    create.assert_status(StatusCode::ACCEPTED);

    let active = server.get("/api/v1/jobs/active").await;
    active.assert_status(StatusCode::OK);
    let jobs: Vec<serde_json::Value> = active.json();
    assert!(jobs.iter().any(|j| j["job_id"] == create.json::<serde_json::Value>()["job_id"]));
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let server = test_server();
    server.get("/api/v1/jobs/active").await;
    let response = server.delete("/api/v1/jobs/nonexistent-id").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_before_terminal_is_conflict() {
    let server = test_server();
    let create = server
        .post("/api/v1/jobs")
        .json(&json!({
            "url": "https://example.com/docs",
            "config": {
                "max_depth": 0,
                "max_pages": 1,
                "use_sitemap": false,
                "respect_robots": false,
                "timeout_ms": 100000
            }
        }))
        .await;
    create.assert_status(StatusCode::ACCEPTED);
    let job_id = create.json::<serde_json::Value>()["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    // The orchestrator needs real network access to finish; immediately
    // after creation the job cannot yet be terminal.
    let download = server
        .get(&format!("/api/v1/jobs/{job_id}/download"))
        .await;
    download.assert_status(StatusCode::CONFLICT);
}
