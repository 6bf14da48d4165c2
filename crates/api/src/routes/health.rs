//! Health and coordination diagnostics.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use atelier_db::repositories::{ChargeRepo, JobRepo, LockRepo};

use crate::admission::CountersSnapshot;
use crate::leader::LockState;
use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// This instance's identity.
    pub instance_id: String,
    /// This instance's coordination role.
    pub role: LockState,
    /// Current lease as seen in storage, if any.
    pub lock: Option<LockView>,
    /// Admission queue counters.
    pub admission: CountersSnapshot,
    /// Count of non-terminal generation jobs.
    pub active_jobs: Option<i64>,
    /// Sum of currently reserved charges.
    pub reserved_total: Option<f64>,
    /// Whether the database is reachable.
    pub db_healthy: bool,
    /// Whether the coordination tables exist.
    pub schema_ready: bool,
}

/// Lease diagnostics.
#[derive(Serialize)]
pub struct LockView {
    pub holder_id: String,
    pub heartbeat_age_secs: i64,
}

/// GET /health -- service, database, and coordination health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = atelier_db::health_check(&state.pool).await.is_ok();
    let schema_ready = atelier_db::schema_ready(&state.pool).await.unwrap_or(false);

    let lock = match LockRepo::find(&state.pool, state.lock.lock_key()).await {
        Ok(Some(record)) => Some(LockView {
            heartbeat_age_secs: record.heartbeat_age_secs(chrono::Utc::now()),
            holder_id: record.holder_id,
        }),
        _ => None,
    };

    let active_jobs = JobRepo::count_active(&state.pool).await.ok();
    let reserved_total = ChargeRepo::reserved_total(&state.pool)
        .await
        .ok()
        .and_then(|total| total.to_f64());

    let admission = state.admission.counters();
    let status = if db_healthy && schema_ready && !admission.dedup_degraded {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        instance_id: state.config.instance_id.clone(),
        role: state.lock.state(),
        lock,
        admission,
        active_jobs,
        reserved_total,
        db_healthy,
        schema_ready,
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
