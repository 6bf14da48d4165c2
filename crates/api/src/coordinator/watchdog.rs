//! Stuck-job watchdog. Runs on the ACTIVE instance only.
//!
//! Forces any job that has been non-terminal longer than the ceiling into
//! `timeout`, then refunds and delivers through the same idempotent paths
//! the normal finalizers use. It also drives redelivery: terminal jobs
//! whose notification never went out (failed send, crash mid-delivery) are
//! re-attempted once their delivery claim is expired, which is what turns
//! the delivery lock's TTL into an actual retry rather than a dead letter.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use atelier_core::keys::charge_key_for_job;
use atelier_db::repositories::{ChargeRepo, JobRepo};
use atelier_db::DbPool;

use crate::coordinator::delivery;
use crate::notifier::Notifier;

/// How often the watchdog sweeps.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Age past which a non-terminal job is declared stuck.
const JOB_CEILING_SECS: f64 = 900.0;

/// Run the watchdog until `cancel` fires.
pub async fn run(pool: DbPool, notifier: Arc<Notifier>, cancel: CancellationToken) {
    tracing::info!("Job watchdog started");
    let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job watchdog stopping");
                break;
            }
            _ = interval.tick() => {}
        }

        sweep(&pool, &notifier).await;
        redeliver(&pool, &notifier).await;
    }
}

async fn sweep(pool: &DbPool, notifier: &Notifier) {
    let jobs = match JobRepo::sweep_timeouts(pool, JOB_CEILING_SECS).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(error = %e, "Timeout sweep failed");
            return;
        }
    };
    if jobs.is_empty() {
        return;
    }

    tracing::warn!(count = jobs.len(), "Timed out stuck jobs");
    for job in jobs {
        match ChargeRepo::refund(pool, &charge_key_for_job(job.id)).await {
            Ok(true) => tracing::info!(job_id = job.id, "Refunded timed-out job"),
            Ok(false) => {}
            Err(e) => tracing::error!(job_id = job.id, error = %e, "Timeout refund failed"),
        }
        delivery::deliver_outcome(pool, notifier, job.id).await;
    }
}

/// Retry delivery for every finished job the user never heard about.
async fn redeliver(pool: &DbPool, notifier: &Notifier) {
    let jobs = match JobRepo::list_undelivered_terminal(pool, delivery::DELIVERY_TTL_SECS).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(error = %e, "Redelivery sweep failed");
            return;
        }
    };
    if jobs.is_empty() {
        return;
    }

    tracing::info!(count = jobs.len(), "Retrying undelivered outcomes");
    for job in jobs {
        delivery::deliver_outcome(pool, notifier, job.id).await;
    }
}
