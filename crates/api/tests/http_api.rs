//! Integration tests for the HTTP intake.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{body_json, build_test_app, get, post_json, put_json};
use sdqueue_api::router::REQUEST_ID_HEADER;

fn generate_body() -> serde_json::Value {
    json!({ "prompt": "a red fox in snow", "steps": 20 })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_worker_counts() {
    let app = build_test_app(&["w1", "w2"], &[("w1", "modelA")]).await;
    let response = get(app.router.clone(), "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(REQUEST_ID_HEADER).is_some());

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["workers_online"], 1);
    assert_eq!(json["workers_total"], 2);
    assert_eq!(json["queued"], 0);
}

#[tokio::test]
async fn health_degraded_without_workers() {
    let app = build_test_app(&["w1"], &[]).await;
    let json = body_json(get(app.router.clone(), "/health", None).await).await;
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = build_test_app(&["w1"], &[]).await;
    let response = get(app.router.clone(), "/this-route-does-not-exist", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Workers and checkpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workers_lists_registry_snapshot() {
    let app = build_test_app(&["w1", "w2"], &[("w1", "modelA.safetensors [1234]")]).await;
    let response = get(app.router.clone(), "/api/v1/workers", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let workers = json["data"].as_array().unwrap();
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0]["name"], "w1");
    assert_eq!(workers[0]["online"], true);
    assert_eq!(workers[0]["current_checkpoint"], "modelA");
    assert_eq!(workers[0]["busy"], false);
    assert_eq!(workers[1]["online"], false);
}

#[tokio::test]
async fn unknown_worker_is_404() {
    let app = build_test_app(&["w1"], &[]).await;
    let response = get(app.router.clone(), "/api/v1/workers/ghost", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn checkpoints_filter_by_query() {
    let app = build_test_app(&["w1", "w2"], &[("w1", "modelA"), ("w2", "other")]).await;

    let json = body_json(get(app.router.clone(), "/api/v1/checkpoints?q=MODEL", None).await).await;
    let suggestions = json["data"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["value"], "modelA");
    assert_eq!(suggestions[0]["label"], "modelA (w1)");

    let json = body_json(get(app.router.clone(), "/api/v1/checkpoints", None).await).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_requires_submitter_header() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;
    let response = post_json(app.router.clone(), "/api/v1/generate", None, generate_body()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn generate_returns_images_and_status() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;
    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("alice"),
        generate_body(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["worker"], "w1");
    assert_eq!(json["data"]["images"][0], "image-for-a red fox in snow");
    assert_eq!(json["data"]["status"][0]["message"], "Generating image on w1");
    assert!(json["data"]["job_id"].is_string());
    assert!(!app.state.registry.get("w1").await.unwrap().busy);
}

#[tokio::test]
async fn generate_validates_input() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;
    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("alice"),
        json!({ "prompt": "x", "steps": 0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    assert!(app.executor.calls().is_empty());
}

#[tokio::test]
async fn generate_rejects_unavailable_checkpoint() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;
    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("alice"),
        json!({ "prompt": "x", "steps": 10, "checkpoint": "modelB.safetensors" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "CHECKPOINT_UNAVAILABLE");
}

#[tokio::test]
async fn generate_without_workers_is_503() {
    let app = build_test_app(&["w1"], &[]).await;
    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("alice"),
        generate_body(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "NO_WORKER_AVAILABLE");
}

#[tokio::test]
async fn generate_requires_feature_on_worker() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;
    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("alice"),
        json!({ "prompt": "x", "steps": 10, "feature": "controlnet" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    app.probe.online_with("w1", "modelA", vec!["sd-webui-controlnet"]);
    app.state.registry.refresh_all().await;

    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("alice"),
        json!({ "prompt": "x", "steps": 10, "feature": "controlnet" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn generate_is_rate_limited() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;

    for _ in 0..3 {
        let response = post_json(
            app.router.clone(),
            "/api/v1/generate",
            Some("alice"),
            generate_body(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("alice"),
        generate_body(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get("retry-after").is_some());
    assert_eq!(body_json(response).await["code"], "RATE_LIMITED");

    // Other submitters are unaffected.
    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("bob"),
        generate_body(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn urgent_priority_needs_moderator() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;
    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("alice"),
        json!({ "prompt": "x", "steps": 10, "priority": "urgent" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_admin_sets_levels() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;

    let response = put_json(
        app.router.clone(),
        "/api/v1/permissions/bob",
        Some("alice"),
        json!({ "level": "denied" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = put_json(
        app.router.clone(),
        "/api/v1/permissions/bob",
        Some("root"),
        json!({ "level": "denied" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["previous"], "user");
    assert_eq!(json["data"]["level"], "denied");

    let response = post_json(
        app.router.clone(),
        "/api/v1/generate",
        Some("bob"),
        generate_body(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_level_is_400() {
    let app = build_test_app(&["w1"], &[]).await;
    let response = put_json(
        app.router.clone(),
        "/api/v1/permissions/bob",
        Some("root"),
        json!({ "level": "overlord" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submitters_view_own_level_only() {
    let app = build_test_app(&["w1"], &[]).await;

    let json = body_json(get(app.router.clone(), "/api/v1/permissions/alice", Some("alice")).await).await;
    assert_eq!(json["data"]["level"], "user");
    assert_eq!(json["data"]["can_generate"], true);

    let response = get(app.router.clone(), "/api/v1/permissions/bob", Some("alice")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = get(app.router.clone(), "/api/v1/permissions/bob", Some("root")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_view_is_empty_when_idle() {
    let app = build_test_app(&["w1"], &[("w1", "modelA")]).await;
    let json = body_json(get(app.router.clone(), "/api/v1/queue", None).await).await;
    assert_eq!(json["data"]["jobs"].as_array().unwrap().len(), 0);
    assert_eq!(json["data"]["stats"]["queued"], 0);

    let json = body_json(get(app.router.clone(), "/api/v1/queue/me", Some("alice")).await).await;
    assert!(json["data"]["position"].is_null());
}
