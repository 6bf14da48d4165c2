//! Shared application state and the ACTIVE-only service stack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use atelier_db::DbPool;

use crate::admission::AdmissionQueue;
use crate::config::ServerConfig;
use crate::coordinator::{watchdog, JobCoordinator};
use crate::leader::lock::LockController;
use crate::leader::sync::ActiveServices;
use crate::notifier::Notifier;
use crate::{background, coordinator};

/// State shared with every request handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<ServerConfig>,
    pub admission: Arc<AdmissionQueue>,
    pub coordinator: Arc<JobCoordinator>,
    pub lock: Arc<LockController>,
}

/// The services only the ACTIVE instance runs: webhook registration, the
/// poll sweep, the stuck-job watchdog, and dedup-ledger retention.
pub struct ActiveStack {
    pool: DbPool,
    coordinator: Arc<JobCoordinator>,
    notifier: Arc<Notifier>,
    webhook_url: String,
    /// Cancellation token for the currently running active tasks, if any.
    /// Doubles as the init guard: `Some` means the stack is up.
    running: Mutex<Option<CancellationToken>>,
}

impl ActiveStack {
    pub fn new(
        pool: DbPool,
        coordinator: Arc<JobCoordinator>,
        notifier: Arc<Notifier>,
        webhook_url: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            coordinator,
            notifier,
            webhook_url,
            running: Mutex::new(None),
        })
    }

    /// Register the inbound webhook, retrying a few times. Registration is
    /// idempotent on the platform side, so redundant calls are harmless.
    async fn register_webhook(&self) {
        for attempt in 1..=3u32 {
            match self.notifier.set_webhook(&self.webhook_url).await {
                Ok(()) => {
                    tracing::info!(url = %self.webhook_url, "Webhook registered");
                    return;
                }
                Err(e) if attempt < 3 => {
                    tracing::warn!(attempt, error = %e, "Webhook registration failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Err(e) => {
                    // Updates from before activation will be redelivered by
                    // the platform once a later registration succeeds.
                    tracing::error!(error = %e, "Webhook registration failed, giving up");
                }
            }
        }
    }
}

#[async_trait]
impl ActiveServices for ActiveStack {
    async fn init_active_services(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("Active services already running, skipping init");
            return;
        }

        self.register_webhook().await;
        self.coordinator.reload_poll_schedule().await;

        let cancel = CancellationToken::new();
        tokio::spawn(coordinator::JobCoordinator::run_poll_sweep(
            Arc::clone(&self.coordinator),
            cancel.clone(),
        ));
        tokio::spawn(watchdog::run(
            self.pool.clone(),
            Arc::clone(&self.notifier),
            cancel.clone(),
        ));
        tokio::spawn(background::event_retention::run(
            self.pool.clone(),
            cancel.clone(),
        ));

        *running = Some(cancel);
        tracing::info!("Active services started");
    }

    async fn teardown_active_services(&self) {
        let mut running = self.running.lock().await;
        match running.take() {
            Some(cancel) => {
                // The webhook registration is left in place: the next ACTIVE
                // instance re-registers the same deployment-wide URL, and an
                // unregistered window would drop updates for nothing.
                cancel.cancel();
                tracing::info!("Active services stopped");
            }
            None => tracing::debug!("Active services not running, nothing to tear down"),
        }
    }
}
