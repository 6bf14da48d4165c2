//! Retention pruning for the processed-event dedup ledger.
//!
//! The messaging platform retries undelivered updates for at most a couple
//! of days, so rows older than the retention window can never collide with
//! a live retry and are safe to drop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use atelier_db::repositories::ProcessedEventRepo;
use atelier_db::DbPool;

/// How often the pruner runs.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Rows older than this are pruned.
const RETENTION_HOURS: i64 = 72;

/// Run the retention loop until `cancel` fires.
pub async fn run(pool: DbPool, cancel: CancellationToken) {
    tracing::info!("Event retention pruner started");
    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Event retention pruner stopping");
                break;
            }
            _ = interval.tick() => {}
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::hours(RETENTION_HOURS);
        match ProcessedEventRepo::prune_older_than(&pool, cutoff).await {
            Ok(0) => {}
            Ok(pruned) => tracing::info!(pruned, "Pruned old processed events"),
            Err(e) => tracing::error!(error = %e, "Event retention prune failed"),
        }
    }
}
