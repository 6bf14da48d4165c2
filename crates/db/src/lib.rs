//! Database access layer: pool helpers, models, and repositories.
//!
//! All cross-instance mutable state (leader lease, processed-event ledger,
//! job rows, charge ledger) lives in PostgreSQL, and every mutation a
//! repository performs is a single atomic statement. Read-then-write
//! sequences are deliberately absent: they reintroduce exactly the races
//! this layer exists to eliminate.

pub mod models;
pub mod repositories;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Convenience alias used across the workspace.
pub type DbPool = PgPool;

/// Create the shared connection pool.
///
/// Short acquire timeout so a database outage degrades callers (the lock
/// controller falls back to PASSIVE) instead of hanging them.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Cheap connectivity probe used by /health and at startup.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Whether the coordination tables exist. Reported by /health so an
/// instance pointed at an unmigrated database is visibly not ready.
pub async fn schema_ready(pool: &DbPool) -> Result<bool, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = 'public' \
           AND table_name IN ('leader_lock', 'processed_events', 'jobs', 'charges', 'users')",
    )
    .fetch_one(pool)
    .await?;
    Ok(row.0 == 5)
}
