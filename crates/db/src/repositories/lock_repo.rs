//! Repository for the `leader_lock` table.
//!
//! The lease is one row per lock key. Acquisition, re-acquisition and stale
//! takeover are all the same `INSERT ... ON CONFLICT DO UPDATE` statement:
//! the conditional `WHERE` on the update arm makes a takeover race safe
//! because only one of two competing statements can satisfy it.

use sqlx::PgPool;

use crate::models::lock::LockRecord;

const COLUMNS: &str = "lock_key, holder_id, acquired_at, heartbeat_at";

/// Provides the leader-election primitives.
pub struct LockRepo;

impl LockRepo {
    /// Try to take (or keep) the lease in one atomic statement.
    ///
    /// Succeeds when the row is absent, when we already hold it, or when the
    /// current holder's heartbeat is older than `stale_after_secs`. Returns
    /// `true` if `holder_id` holds the lease after the statement.
    ///
    /// Two racing PASSIVE instances cannot both win: the row lock serializes
    /// the two upserts and the second one re-evaluates the staleness
    /// predicate against the row the first one just refreshed.
    pub async fn try_acquire(
        pool: &PgPool,
        lock_key: i64,
        holder_id: &str,
        stale_after_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "INSERT INTO leader_lock (lock_key, holder_id, acquired_at, heartbeat_at) \
             VALUES ($1, $2, NOW(), NOW()) \
             ON CONFLICT (lock_key) DO UPDATE \
                 SET holder_id = EXCLUDED.holder_id, \
                     acquired_at = NOW(), \
                     heartbeat_at = NOW() \
                 WHERE leader_lock.holder_id = EXCLUDED.holder_id \
                    OR leader_lock.heartbeat_at < NOW() - make_interval(secs => $3) \
             RETURNING holder_id",
        )
        .bind(lock_key)
        .bind(holder_id)
        .bind(stale_after_secs)
        .fetch_optional(pool)
        .await?;

        // No row returned means the conflict arm's WHERE rejected us: a live
        // holder exists and it is not us.
        Ok(row.is_some())
    }

    /// Refresh the heartbeat. Returns `false` if we are no longer the
    /// holder (another instance took over), which the controller treats as
    /// loss of leadership.
    pub async fn heartbeat(
        pool: &PgPool,
        lock_key: i64,
        holder_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE leader_lock SET heartbeat_at = NOW() \
             WHERE lock_key = $1 AND holder_id = $2",
        )
        .bind(lock_key)
        .bind(holder_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop the lease if we still hold it. Best-effort at shutdown.
    pub async fn release(
        pool: &PgPool,
        lock_key: i64,
        holder_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM leader_lock WHERE lock_key = $1 AND holder_id = $2",
        )
        .bind(lock_key)
        .bind(holder_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current lease row, if any. Used by /health for holder identity and
    /// heartbeat age.
    pub async fn find(pool: &PgPool, lock_key: i64) -> Result<Option<LockRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM leader_lock WHERE lock_key = $1");
        sqlx::query_as::<_, LockRecord>(&query)
            .bind(lock_key)
            .fetch_optional(pool)
            .await
    }
}
