//! Processed-event ledger entity model.

use sqlx::FromRow;

use atelier_core::types::Timestamp;

/// A row from the `processed_events` table. Created once per inbound update
/// id, never mutated, pruned only by the retention job.
#[derive(Debug, Clone, FromRow)]
pub struct ProcessedEvent {
    pub event_id: i64,
    pub processed_at: Timestamp,
}
