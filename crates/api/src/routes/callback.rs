//! Generation-service completion callback.
//!
//! Like the platform webhook, this endpoint acks fast and unconditionally
//! for authenticated callers: a retrying generation service hammering a 500
//! helps nobody, and the poll path covers anything a dropped callback
//! misses. Actual resolution runs on a spawned task.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::state::AppState;

/// POST /callback/generation -- task completion notice.
async fn generation_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let token = headers
        .get("x-callback-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if token != state.config.callback_token {
        tracing::warn!("Generation callback with bad token rejected");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => {
            let coordinator = state.coordinator.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator.handle_callback(&payload).await {
                    tracing::error!(error = %e, "Callback processing failed");
                }
            });
        }
        Err(e) => {
            tracing::warn!(error = %e, "Generation callback body is not valid JSON, dropping");
        }
    }

    Json(serde_json::json!({ "ok": true })).into_response()
}

/// Mount the callback route.
pub fn router() -> Router<AppState> {
    Router::new().route("/callback/generation", post(generation_callback))
}
