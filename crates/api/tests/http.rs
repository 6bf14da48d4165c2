//! Integration tests for the HTTP surface: webhook fast-ack contract,
//! callback authentication, and the health endpoint.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get, post};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// /health
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn health_check_reports_coordination_state(pool: PgPool) {
    let app = build_test_app(pool);
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["db_healthy"], true);
    assert_eq!(json["schema_ready"], true);
    // No controller loop runs in tests, so the instance observes PASSIVE.
    assert_eq!(json["role"], "passive");
    assert_eq!(json["active_jobs"], 0);
    assert_eq!(json["admission"]["received"], 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn unknown_route_returns_404(pool: PgPool) {
    let app = build_test_app(pool);
    let response = get(app, "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn response_contains_x_request_id_header(pool: PgPool) {
    let app = build_test_app(pool);
    let response = get(app, "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header present")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(request_id.len(), 36);
}

// ---------------------------------------------------------------------------
// /webhook/{secret}
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn webhook_acks_valid_update_and_admits_it(pool: PgPool) {
    let app = build_test_app(pool);
    let response = post(
        app.clone(),
        "/webhook/test-secret",
        &[("content-type", "application/json")],
        r#"{"update_id": 1001, "message": {"chat": {"id": 7}, "text": "/balance"}}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);

    // The update sits in the queue until a worker (not running here)
    // drains it.
    let diag = body_json(get(app, "/webhook/test-secret").await).await;
    assert_eq!(diag["counters"]["received"], 1);
    assert_eq!(diag["counters"]["depth"], 1);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn webhook_acks_malformed_body_without_admitting(pool: PgPool) {
    let app = build_test_app(pool);
    let response = post(
        app.clone(),
        "/webhook/test-secret",
        &[("content-type", "application/json")],
        "{not json at all",
    )
    .await;

    // The fast-ack contract holds even for garbage.
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);

    let diag = body_json(get(app, "/webhook/test-secret").await).await;
    assert_eq!(diag["counters"]["received"], 0);
    assert_eq!(diag["counters"]["depth"], 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn webhook_with_wrong_secret_is_not_found(pool: PgPool) {
    let app = build_test_app(pool);
    let response = post(
        app,
        "/webhook/wrong-secret",
        &[("content-type", "application/json")],
        r#"{"update_id": 1}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// /callback/generation
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn callback_requires_the_shared_token(pool: PgPool) {
    let app = build_test_app(pool.clone());
    let response = post(
        app,
        "/callback/generation",
        &[("content-type", "application/json")],
        r#"{"task_id": "t-1", "status": "done"}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let app = build_test_app(pool);
    let response = post(
        app,
        "/callback/generation",
        &[
            ("content-type", "application/json"),
            ("x-callback-token", "test-callback-token"),
        ],
        r#"{"task_id": "unknown-task", "status": "done"}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn callback_acks_payload_without_task_reference(pool: PgPool) {
    let app = build_test_app(pool);
    let response = post(
        app,
        "/callback/generation",
        &[
            ("content-type", "application/json"),
            ("x-callback-token", "test-callback-token"),
        ],
        r#"{"event": "completed", "details": {}}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);
}
