//! Reconciliation between lease state and the active-only services.
//!
//! [`StateSyncLoop`] compares the lock controller's state to its own stored
//! `active` flag on a short tick and fires exactly one of
//! `init_active_services` / `teardown_active_services` at each transition
//! edge, not on every tick. The one correctness-critical wrinkle: when the
//! lease is won synchronously at startup, before the first tick, the loop
//! must still run init exactly once -- an instance that believes it is the
//! leader but never registered its webhook is indistinguishable from a dead
//! one to the outside world.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::LockState;

/// Reconciliation cadence.
const SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// The services that only the ACTIVE instance runs.
///
/// `init_active_services` must be idempotent: a takeover race can, in rare
/// cases, trigger it redundantly across the boundary of a single tick.
#[async_trait]
pub trait ActiveServices: Send + Sync {
    /// Bring up the active-only services (webhook registration, polling,
    /// watchdog). Must be safe to call more than once.
    async fn init_active_services(&self);

    /// Stop the active-only services.
    async fn teardown_active_services(&self);
}

/// Drives [`ActiveServices`] from lease-state transitions.
pub struct StateSyncLoop;

impl StateSyncLoop {
    /// Run the reconciliation loop until `cancel` fires.
    ///
    /// If the instance is still active on cancellation, services are torn
    /// down before returning so shutdown does not leak background work.
    pub async fn run(
        rx: watch::Receiver<LockState>,
        services: Arc<dyn ActiveServices>,
        cancel: CancellationToken,
    ) {
        let mut active = false;

        // Startup edge: the lease may have been acquired before this loop
        // ever ticked. "No transition observed" must not skip init.
        if *rx.borrow() == LockState::Active {
            tracing::info!("Already active at startup, initializing active services");
            services.init_active_services().await;
            active = true;
        }

        let mut interval = tokio::time::interval(SYNC_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("State sync loop stopping");
                    break;
                }
                _ = interval.tick() => {}
            }

            let now_active = *rx.borrow() == LockState::Active;
            if now_active && !active {
                tracing::info!("Became active, initializing active services");
                services.init_active_services().await;
                active = true;
            } else if !now_active && active {
                tracing::info!("Became passive, tearing down active services");
                services.teardown_active_services().await;
                active = false;
            }
        }

        if active {
            services.teardown_active_services().await;
        }
    }
}
