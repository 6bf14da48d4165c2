//! Cluster-wide mutual-exclusion lock controller.
//!
//! One [`LockController`] per process. It never blocks a caller waiting for
//! the lease: acquisition, heartbeat and takeover all happen on its own
//! tick loop, and the rest of the process observes the current state
//! through a `watch` channel. A database outage degrades this instance to
//! PASSIVE; it never hangs it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use atelier_db::repositories::LockRepo;
use atelier_db::DbPool;

use super::LockState;

/// Heartbeat refresh cadence while ACTIVE.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Takeover probe cadence while PASSIVE.
const TAKEOVER_INTERVAL: Duration = Duration::from_secs(15);

/// A holder whose heartbeat is older than this is considered dead and its
/// lease is up for takeover. Roughly three heartbeat intervals plus margin
/// for clock skew.
const STALE_AFTER_SECS: f64 = 90.0;

/// Per-call budget for lock statements. Short, so a database stall degrades
/// the instance instead of wedging the tick loop.
const DB_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive heartbeat failures tolerated before voluntarily demoting.
/// A single blip is retried on the next tick and logged as a warning, not
/// treated as loss of leadership.
const HEARTBEAT_GRACE_MISSES: u32 = 3;

/// Owns the leader lease for this process instance.
pub struct LockController {
    pool: DbPool,
    lock_key: i64,
    holder_id: String,
    state_tx: watch::Sender<LockState>,
}

impl LockController {
    /// Create a controller in PASSIVE state. Call
    /// [`acquire_or_observe`](Self::acquire_or_observe) once at startup and
    /// then spawn [`run`](Self::run).
    pub fn new(pool: DbPool, lock_key: i64, holder_id: String) -> Self {
        let (state_tx, _) = watch::channel(LockState::Passive);
        Self {
            pool,
            lock_key,
            holder_id,
            state_tx,
        }
    }

    /// Current state.
    pub fn state(&self) -> LockState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state transitions (consumed by the sync loop).
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.state_tx.subscribe()
    }

    /// Lock key this controller contends on.
    pub fn lock_key(&self) -> i64 {
        self.lock_key
    }

    /// This instance's holder identity.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// One non-blocking acquisition attempt: ACTIVE if the lease was
    /// obtained, PASSIVE otherwise. Any failure (including a timeout)
    /// counts as PASSIVE.
    pub async fn acquire_or_observe(&self) -> LockState {
        let attempt = tokio::time::timeout(
            DB_CALL_TIMEOUT,
            LockRepo::try_acquire(&self.pool, self.lock_key, &self.holder_id, STALE_AFTER_SECS),
        )
        .await;

        let state = match attempt {
            Ok(Ok(true)) => LockState::Active,
            Ok(Ok(false)) => LockState::Passive,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Lock acquisition failed, staying passive");
                LockState::Passive
            }
            Err(_) => {
                tracing::warn!("Lock acquisition timed out, staying passive");
                LockState::Passive
            }
        };

        self.set_state(state);
        state
    }

    /// Tick loop: heartbeat while ACTIVE, probe for takeover while PASSIVE.
    /// Runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut misses: u32 = 0;

        loop {
            let wait = match self.state() {
                LockState::Active => HEARTBEAT_INTERVAL,
                LockState::Passive => TAKEOVER_INTERVAL,
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Lock controller stopping");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.state() {
                LockState::Active => self.heartbeat_tick(&mut misses).await,
                LockState::Passive => {
                    misses = 0;
                    if self.acquire_or_observe().await == LockState::Active {
                        tracing::info!(
                            holder_id = %self.holder_id,
                            "Took over the leader lease"
                        );
                    }
                }
            }
        }

        // Hand the lease back so a standby can take over without waiting
        // out the staleness window.
        self.release().await;
    }

    /// Refresh the heartbeat, tolerating transient failures up to the grace
    /// window. An explicit "not the holder" answer demotes immediately.
    async fn heartbeat_tick(&self, misses: &mut u32) {
        let attempt = tokio::time::timeout(
            DB_CALL_TIMEOUT,
            LockRepo::heartbeat(&self.pool, self.lock_key, &self.holder_id),
        )
        .await;

        match attempt {
            Ok(Ok(true)) => {
                *misses = 0;
            }
            Ok(Ok(false)) => {
                tracing::warn!("Leader lease was taken by another instance, demoting");
                *misses = 0;
                self.set_state(LockState::Passive);
            }
            Ok(Err(e)) => {
                *misses += 1;
                tracing::warn!(error = %e, misses, "Heartbeat failed, will retry");
                if *misses >= HEARTBEAT_GRACE_MISSES {
                    tracing::warn!("Heartbeat grace window exhausted, demoting to passive");
                    *misses = 0;
                    self.set_state(LockState::Passive);
                }
            }
            Err(_) => {
                *misses += 1;
                tracing::warn!(misses, "Heartbeat timed out, will retry");
                if *misses >= HEARTBEAT_GRACE_MISSES {
                    tracing::warn!("Heartbeat grace window exhausted, demoting to passive");
                    *misses = 0;
                    self.set_state(LockState::Passive);
                }
            }
        }
    }

    /// Best-effort release at graceful shutdown. Failures here are expected
    /// when the pool is already tearing down, so they log at info.
    pub async fn release(&self) {
        self.set_state(LockState::Passive);

        let attempt = tokio::time::timeout(
            DB_CALL_TIMEOUT,
            LockRepo::release(&self.pool, self.lock_key, &self.holder_id),
        )
        .await;

        match attempt {
            Ok(Ok(true)) => tracing::info!("Leader lease released"),
            Ok(Ok(false)) => tracing::info!("Leader lease was not held at shutdown"),
            Ok(Err(e)) => {
                tracing::info!(error = %e, "Lease release failed during teardown (expected)")
            }
            Err(_) => tracing::info!("Lease release timed out during teardown (expected)"),
        }
    }

    fn set_state(&self, state: LockState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
