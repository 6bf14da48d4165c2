//! Shared helpers for the HTTP integration tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tower::ServiceExt;

use atelier_api::admission::{AdmissionQueue, QUEUE_CAPACITY};
use atelier_api::config::ServerConfig;
use atelier_api::coordinator::JobCoordinator;
use atelier_api::leader::lock::LockController;
use atelier_api::notifier::Notifier;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;
use atelier_genapi::GenApi;

/// Build a test `ServerConfig` with safe defaults. The messaging and
/// generation endpoints point at localhost ports nothing listens on; tests
/// that would hit them do not go that far.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        bot_token: "000:test-token".to_string(),
        messaging_api_url: "http://127.0.0.1:9".to_string(),
        webhook_secret: "test-secret".to_string(),
        public_base_url: "http://127.0.0.1:3000".to_string(),
        gen_api_url: "http://127.0.0.1:9/api".to_string(),
        gen_api_key: "test-key".to_string(),
        callback_token: "test-callback-token".to_string(),
        generation_price: Decimal::ONE,
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        instance_id: "test-instance".to_string(),
    }
}

/// Build the full application router with all middleware layers, using the
/// given database pool. Mirrors the construction in `main.rs` so tests
/// exercise the same stack production uses. No background workers or loops
/// are spawned.
pub fn build_test_app(pool: PgPool) -> Router {
    let config = test_config();

    let notifier = Arc::new(Notifier::new(&config.messaging_api_url, &config.bot_token));
    let gen = GenApi::new(config.gen_api_url.clone(), config.gen_api_key.clone());
    let coordinator = JobCoordinator::new(
        pool.clone(),
        gen,
        notifier,
        config.generation_price,
        config.callback_url(),
    );
    let lock = Arc::new(LockController::new(
        pool.clone(),
        42,
        config.instance_id.clone(),
    ));

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        admission: AdmissionQueue::new(QUEUE_CAPACITY),
        coordinator,
        lock,
    };

    build_app_router(state, &config)
}

/// Issue a GET request against the router.
pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request builder"),
    )
    .await
    .expect("router never fails")
}

/// Issue a POST request with a raw body against the router.
pub async fn post(app: Router, uri: &str, headers: &[(&str, &str)], body: &str) -> Response {
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    app.oneshot(
        builder
            .body(Body::from(body.to_string()))
            .expect("request builder"),
    )
    .await
    .expect("router never fails")
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collect")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

/// Assert a status, with the body in the failure message.
#[allow(dead_code)]
pub async fn assert_status(response: Response, expected: StatusCode) {
    let status = response.status();
    if status != expected {
        let body = body_json(response).await;
        panic!("expected {expected}, got {status}: {body}");
    }
}
