//! Repository for the `jobs` table.
//!
//! Status transitions guard on the current status in the `WHERE` clause so
//! a terminal row can never be moved again, whichever path (callback, poll,
//! watchdog) issues the statement. The delivery soft lock lives here too:
//! `try_acquire_delivery` is the single conditional update that resolves
//! the callback-vs-poll race and the overlapping-instance race uniformly.

use sqlx::PgPool;

use atelier_core::types::DbId;

use crate::models::job::Job;
use crate::models::status::{JobStatus, StatusId};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, model_id, input_payload, external_task_id, status_id, \
    result, error_message, charge_key, delivering_at, delivered_at, \
    created_at, updated_at";

/// Non-terminal statuses: pending, processing.
const ACTIVE_STATUSES: [StatusId; 2] = [
    JobStatus::Pending as StatusId,
    JobStatus::Processing as StatusId,
];

/// Provides persistence and the delivery lock for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Create a new pending job.
    pub async fn submit(
        pool: &PgPool,
        user_id: DbId,
        model_id: &str,
        input_payload: &serde_json::Value,
    ) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (user_id, model_id, input_payload, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(user_id)
            .bind(model_id)
            .bind(input_payload)
            .bind(JobStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Record the external task id and charge key once submission to the
    /// generation API succeeded, moving the job to `processing`.
    pub async fn mark_submitted(
        pool: &PgPool,
        job_id: DbId,
        external_task_id: &str,
        charge_key: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs \
             SET external_task_id = $2, charge_key = $3, status_id = $4, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(external_task_id)
        .bind(charge_key)
        .bind(JobStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Move a job to `done` with its result payload.
    ///
    /// Guarded on a non-terminal current status; returns `false` when the
    /// job was already finalized by a racing path (a no-op, not an error).
    pub async fn complete(
        pool: &PgPool,
        job_id: DbId,
        result: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            "UPDATE jobs SET status_id = $2, result = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id IN ($4, $5)",
        )
        .bind(job_id)
        .bind(JobStatus::Done.id())
        .bind(result)
        .bind(ACTIVE_STATUSES[0])
        .bind(ACTIVE_STATUSES[1])
        .execute(pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Move a job to a failing terminal status (`failed` / `timeout` /
    /// `cancelled`) with an error message. Same non-terminal guard as
    /// [`complete`](Self::complete).
    pub async fn finalize_failure(
        pool: &PgPool,
        job_id: DbId,
        status: JobStatus,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        debug_assert!(status.is_terminal() && status != JobStatus::Done);
        let res = sqlx::query(
            "UPDATE jobs SET status_id = $2, error_message = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id IN ($4, $5)",
        )
        .bind(job_id)
        .bind(status.id())
        .bind(error)
        .bind(ACTIVE_STATUSES[0])
        .bind(ACTIVE_STATUSES[1])
        .execute(pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Force every job older than `ceiling_secs` that is still non-terminal
    /// into `timeout`, returning the affected rows so the watchdog can
    /// refund and notify.
    pub async fn sweep_timeouts(
        pool: &PgPool,
        ceiling_secs: f64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $1, error_message = 'generation timed out', updated_at = NOW() \
             WHERE status_id IN ($2, $3) \
               AND created_at < NOW() - make_interval(secs => $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Timeout.id())
            .bind(ACTIVE_STATUSES[0])
            .bind(ACTIVE_STATUSES[1])
            .bind(ceiling_secs)
            .fetch_all(pool)
            .await
    }

    /// Acquire the per-job delivery soft lock.
    ///
    /// Single conditional update: claim `delivering_at` only if the job was
    /// never delivered and no live claim exists (a stale claim past
    /// `ttl_secs` is reclaimable, which is what makes a crash mid-delivery
    /// self-healing). Returns the row only to the winning caller.
    pub async fn try_acquire_delivery(
        pool: &PgPool,
        job_id: DbId,
        ttl_secs: f64,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET delivering_at = NOW(), updated_at = NOW() \
             WHERE id = $1 \
               AND delivered_at IS NULL \
               AND (delivering_at IS NULL OR delivering_at < NOW() - make_interval(secs => $2)) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(ttl_secs)
            .fetch_optional(pool)
            .await
    }

    /// Settle the delivery claim after the send was attempted.
    ///
    /// On success `delivered_at` is set (and the claim cleared); on failure
    /// only the claim is cleared, so a retry or the other racing path can
    /// acquire the lock again. Delivery is attempted first and marked
    /// second, never the other way around.
    pub async fn mark_delivered(
        pool: &PgPool,
        job_id: DbId,
        success: bool,
    ) -> Result<(), sqlx::Error> {
        if success {
            sqlx::query(
                "UPDATE jobs \
                 SET delivered_at = NOW(), delivering_at = NULL, updated_at = NOW() \
                 WHERE id = $1 AND delivered_at IS NULL",
            )
            .bind(job_id)
            .execute(pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE jobs SET delivering_at = NULL, updated_at = NOW() \
                 WHERE id = $1 AND delivered_at IS NULL",
            )
            .bind(job_id)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    /// Terminal jobs whose outcome never reached the user: `delivered_at`
    /// unset and no live delivery claim (a claim older than `ttl_secs` is
    /// stale and reclaimable). This is the redelivery sweep's work list; a
    /// send failure or a crash mid-delivery lands the job here until a
    /// later attempt succeeds.
    pub async fn list_undelivered_terminal(
        pool: &PgPool,
        ttl_secs: f64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id NOT IN ($1, $2) \
               AND delivered_at IS NULL \
               AND (delivering_at IS NULL OR delivering_at < NOW() - make_interval(secs => $3)) \
             ORDER BY updated_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(ACTIVE_STATUSES[0])
            .bind(ACTIVE_STATUSES[1])
            .bind(ttl_secs)
            .fetch_all(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a job by the generation API's task id (callback path).
    pub async fn find_by_task_id(
        pool: &PgPool,
        external_task_id: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE external_task_id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(external_task_id)
            .fetch_optional(pool)
            .await
    }

    /// All non-terminal jobs that have an external task to poll. Used to
    /// rebuild the in-memory poll schedule when an instance becomes ACTIVE.
    pub async fn list_pollable(pool: &PgPool) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id IN ($1, $2) AND external_task_id IS NOT NULL \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(ACTIVE_STATUSES[0])
            .bind(ACTIVE_STATUSES[1])
            .fetch_all(pool)
            .await
    }

    /// Count of non-terminal jobs, reported by /health.
    pub async fn count_active(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status_id IN ($1, $2)")
                .bind(ACTIVE_STATUSES[0])
                .bind(ACTIVE_STATUSES[1])
                .fetch_one(pool)
                .await?;
        Ok(row.0)
    }
}
