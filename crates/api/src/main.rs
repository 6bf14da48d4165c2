use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_api::admission::{AdmissionQueue, QUEUE_CAPACITY};
use atelier_api::config::ServerConfig;
use atelier_api::coordinator::JobCoordinator;
use atelier_api::handler::GenerationHandler;
use atelier_api::leader::lock::LockController;
use atelier_api::leader::sync::StateSyncLoop;
use atelier_api::notifier::Notifier;
use atelier_api::router::build_app_router;
use atelier_api::state::{ActiveStack, AppState};
use atelier_core::keys::lock_key_for_token;
use atelier_genapi::GenApi;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        instance_id = %config.instance_id,
        "Loaded server configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = atelier_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    atelier_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    atelier_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Core components ---
    let notifier = Arc::new(Notifier::new(&config.messaging_api_url, &config.bot_token));
    let gen = GenApi::new(config.gen_api_url.clone(), config.gen_api_key.clone());
    let coordinator = JobCoordinator::new(
        pool.clone(),
        gen,
        Arc::clone(&notifier),
        config.generation_price,
        config.callback_url(),
    );

    // --- Leader election ---
    let lock_key = lock_key_for_token(&config.bot_token);
    let lock = Arc::new(LockController::new(
        pool.clone(),
        lock_key,
        config.instance_id.clone(),
    ));

    // One synchronous attempt before anything else so a single-instance
    // deployment is ACTIVE from its very first request.
    let initial = lock.acquire_or_observe().await;
    tracing::info!(?initial, lock_key, "Initial lease state determined");

    let shutdown = CancellationToken::new();

    let lock_handle = tokio::spawn(LockController::run(Arc::clone(&lock), shutdown.clone()));

    let active_stack = ActiveStack::new(
        pool.clone(),
        Arc::clone(&coordinator),
        Arc::clone(&notifier),
        config.webhook_url(),
    );
    let sync_handle = tokio::spawn(StateSyncLoop::run(
        lock.subscribe(),
        active_stack,
        shutdown.clone(),
    ));

    // --- Admission workers ---
    let admission = AdmissionQueue::new(QUEUE_CAPACITY);
    let handler = Arc::new(GenerationHandler::new(
        pool.clone(),
        Arc::clone(&coordinator),
        Arc::clone(&notifier),
    ));
    let worker_handles = admission.spawn_workers(pool.clone(), handler, shutdown.clone());
    tracing::info!("Admission workers started");

    // --- App state and router ---
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        admission: Arc::clone(&admission),
        coordinator: Arc::clone(&coordinator),
        lock: Arc::clone(&lock),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    shutdown.cancel();

    // Sync loop first: it tears down active services if this instance held
    // the lease.
    let _ = tokio::time::timeout(grace, sync_handle).await;
    tracing::info!("State sync loop stopped");

    for handle in worker_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!("Admission workers stopped");

    // The lock controller releases the lease on its way out so a standby
    // can take over without waiting for staleness.
    let _ = tokio::time::timeout(Duration::from_secs(5), lock_handle).await;
    tracing::info!("Lock controller stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
