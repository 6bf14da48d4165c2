//! Leader lease entity model.

use serde::Serialize;
use sqlx::FromRow;

use atelier_core::types::Timestamp;

/// A row from the `leader_lock` table. At most one row per `lock_key`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LockRecord {
    pub lock_key: i64,
    pub holder_id: String,
    pub acquired_at: Timestamp,
    pub heartbeat_at: Timestamp,
}

impl LockRecord {
    /// Seconds since the holder last heartbeated.
    pub fn heartbeat_age_secs(&self, now: Timestamp) -> i64 {
        (now - self.heartbeat_at).num_seconds()
    }
}
