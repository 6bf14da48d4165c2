//! Inbound messaging-platform webhook.
//!
//! The route has one hard obligation: acknowledge fast, no matter what.
//! Everything slow or fallible happens behind the admission queue. A non-2xx
//! answer would make the platform re-deliver the same update in a retry
//! storm, so even garbage is acknowledged.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use crate::admission::{CountersSnapshot, InboundUpdate};
use crate::state::AppState;

/// Diagnostic payload for GET /webhook/{secret}.
#[derive(Serialize)]
struct WebhookDiagnostics {
    instance_id: String,
    role: crate::leader::LockState,
    counters: CountersSnapshot,
}

/// POST /webhook/{secret} -- admit one platform update.
///
/// The body is taken as raw bytes so a malformed payload still gets its
/// 200; JSON parsing failures are logged and dropped here, not bounced
/// back to the platform.
async fn receive_update(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    body: Bytes,
) -> Response {
    if secret != state.config.webhook_secret {
        return StatusCode::NOT_FOUND.into_response();
    }

    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => match payload.get("update_id").and_then(|v| v.as_i64()) {
            Some(update_id) => {
                state.admission.enqueue(InboundUpdate { update_id, payload });
            }
            None => {
                tracing::warn!("Webhook payload without update_id, dropping");
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "Webhook payload is not valid JSON, dropping");
        }
    }

    Json(serde_json::json!({ "ok": true })).into_response()
}

/// GET /webhook/{secret} -- admission diagnostics for operators.
async fn webhook_diagnostics(
    State(state): State<AppState>,
    Path(secret): Path<String>,
) -> Response {
    if secret != state.config.webhook_secret {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(WebhookDiagnostics {
        instance_id: state.config.instance_id.clone(),
        role: state.lock.state(),
        counters: state.admission.counters(),
    })
    .into_response()
}

/// Mount the webhook routes.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/webhook/{secret}",
        post(receive_update).get(webhook_diagnostics),
    )
}
