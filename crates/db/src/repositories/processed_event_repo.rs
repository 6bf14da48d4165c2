//! Repository for the `processed_events` at-most-once ledger.

use atelier_core::types::Timestamp;
use sqlx::PgPool;

/// Provides the insert-if-absent admission primitive and retention pruning.
pub struct ProcessedEventRepo;

impl ProcessedEventRepo {
    /// Claim the right to process an inbound update.
    ///
    /// `INSERT ... ON CONFLICT DO NOTHING` against the primary key: exactly
    /// one caller system-wide gets `true` for a given `event_id`, no matter
    /// how many instances race. The uniqueness guarantee is the storage
    /// constraint itself, not an application-level check.
    pub async fn try_claim(pool: &PgPool, event_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO processed_events (event_id) VALUES ($1) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete ledger rows older than `cutoff`. Returns the purge count.
    pub async fn prune_older_than(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
