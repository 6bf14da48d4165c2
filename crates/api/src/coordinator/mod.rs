//! Generation job coordination: submit, track, finalize.
//!
//! A job is driven to a terminal state by whichever of two independent
//! completion-detection paths notices first -- the generation service's
//! callback or the internal polling sweep. Both funnel through
//! [`JobCoordinator::resolve`], and the actual user-facing send is guarded
//! by the per-job delivery lock in [`delivery`], so the race is harmless by
//! construction.

pub mod delivery;
pub mod watchdog;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use atelier_core::backoff::{delay_for_attempt, POLL_BASE_DELAY, POLL_MAX_DELAY};
use atelier_core::error::CoreError;
use atelier_core::keys::charge_key_for_job;
use atelier_core::types::DbId;
use atelier_db::models::charge::ReserveOutcome;
use atelier_db::models::job::Job;
use atelier_db::models::status::JobStatus;
use atelier_db::models::user::User;
use atelier_db::repositories::{ChargeRepo, JobRepo};
use atelier_db::DbPool;
use atelier_genapi::{extract_task_ref, GenApi, GenApiError, TaskStatus};

use crate::error::as_transient;
use crate::notifier::Notifier;

/// How often the sweep task looks for due polls.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Attempts made to create the external task before giving up.
const SUBMIT_ATTEMPTS: u32 = 3;

/// Backoff base/cap for submission retries (shorter than poll backoff; the
/// user is waiting on the ack).
const SUBMIT_BASE_DELAY: Duration = Duration::from_secs(1);
const SUBMIT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Largest accepted prompt.
const MAX_PROMPT_CHARS: usize = 2000;

/// In-memory poll schedule entry for one tracked job.
struct PollEntry {
    attempt: u32,
    due_at: Instant,
}

/// Drives generation jobs from submission to terminal state.
pub struct JobCoordinator {
    pool: DbPool,
    gen: GenApi,
    notifier: Arc<Notifier>,
    price: Decimal,
    callback_url: String,
    /// Jobs this (ACTIVE) instance is polling. Rebuilt from storage on
    /// activation, so a takeover inherits in-flight jobs.
    schedule: Mutex<HashMap<DbId, PollEntry>>,
}

impl JobCoordinator {
    pub fn new(
        pool: DbPool,
        gen: GenApi,
        notifier: Arc<Notifier>,
        price: Decimal,
        callback_url: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            gen,
            notifier,
            price,
            callback_url,
            schedule: Mutex::new(HashMap::new()),
        })
    }

    // -----------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------

    /// Validate, reserve the charge, create the external task, and persist
    /// the job. Returns the pending job handle on success.
    pub async fn submit(
        &self,
        user: &User,
        model_id: &str,
        prompt: &str,
    ) -> Result<Job, CoreError> {
        if model_id.trim().is_empty() {
            return Err(CoreError::Validation("model id must not be empty".into()));
        }
        if prompt.trim().is_empty() {
            return Err(CoreError::Validation("prompt must not be empty".into()));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(CoreError::Validation(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }

        let inputs = serde_json::json!({ "prompt": prompt.trim() });
        let job = JobRepo::submit(&self.pool, user.id, model_id.trim(), &inputs)
            .await
            .map_err(as_transient)?;
        let charge_key = charge_key_for_job(job.id);

        if self.price > Decimal::ZERO {
            let outcome = ChargeRepo::reserve(&self.pool, &charge_key, user.id, self.price)
                .await
                .map_err(as_transient)?;
            if outcome == ReserveOutcome::InsufficientFunds {
                let _ = JobRepo::finalize_failure(
                    &self.pool,
                    job.id,
                    JobStatus::Cancelled,
                    "insufficient balance",
                )
                .await;
                return Err(CoreError::InsufficientFunds { user_id: user.id });
            }
        }

        match self.create_task_with_retry(model_id.trim(), &inputs).await {
            Ok(task_id) => {
                JobRepo::mark_submitted(&self.pool, job.id, &task_id, Some(&charge_key))
                    .await
                    .map_err(as_transient)?;
                self.schedule_poll(job.id, 0).await;
                tracing::info!(
                    job_id = job.id,
                    task_id = %task_id,
                    user_id = user.id,
                    "Generation job submitted"
                );
                Ok(job)
            }
            Err(err) => {
                tracing::warn!(job_id = job.id, error = %err, "Task creation failed, finalizing");
                self.finalize_failed(job.id, JobStatus::Failed, &err.to_string())
                    .await;
                Err(err)
            }
        }
    }

    /// Create the external task, retrying retryable failures a few times
    /// with capped backoff.
    async fn create_task_with_retry(
        &self,
        model_id: &str,
        inputs: &serde_json::Value,
    ) -> Result<String, CoreError> {
        let mut attempt = 0;
        loop {
            match self
                .gen
                .create_task(model_id, inputs, &self.callback_url)
                .await
            {
                Ok(response) => return Ok(response.task_id),
                Err(err) => {
                    let classified = classify_gen_error(err);
                    attempt += 1;
                    if !classified.is_retryable() || attempt >= SUBMIT_ATTEMPTS {
                        return Err(classified);
                    }
                    let delay = delay_for_attempt(attempt - 1, SUBMIT_BASE_DELAY, SUBMIT_MAX_DELAY);
                    tracing::warn!(attempt, error = %classified, "Task creation retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Poll scheduling
    // -----------------------------------------------------------------

    /// Rebuild the poll schedule from storage. Called on activation so a
    /// freshly promoted instance picks up jobs submitted by its
    /// predecessor.
    pub async fn reload_poll_schedule(&self) {
        match JobRepo::list_pollable(&self.pool).await {
            Ok(jobs) => {
                let mut schedule = self.schedule.lock().await;
                schedule.clear();
                for job in &jobs {
                    schedule.insert(
                        job.id,
                        PollEntry {
                            attempt: 0,
                            due_at: Instant::now(),
                        },
                    );
                }
                tracing::info!(count = jobs.len(), "Poll schedule rebuilt from storage");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to rebuild poll schedule");
            }
        }
    }

    async fn schedule_poll(&self, job_id: DbId, attempt: u32) {
        let delay = delay_for_attempt(attempt, POLL_BASE_DELAY, POLL_MAX_DELAY);
        self.schedule.lock().await.insert(
            job_id,
            PollEntry {
                attempt,
                due_at: Instant::now() + delay,
            },
        );
    }

    async fn unschedule_poll(&self, job_id: DbId) {
        self.schedule.lock().await.remove(&job_id);
    }

    /// Poll sweep loop. Runs while this instance is ACTIVE.
    pub async fn run_poll_sweep(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!("Poll sweep started");
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Poll sweep stopping");
                    break;
                }
                _ = interval.tick() => {}
            }

            let due: Vec<(DbId, u32)> = {
                let schedule = self.schedule.lock().await;
                let now = Instant::now();
                schedule
                    .iter()
                    .filter(|(_, entry)| entry.due_at <= now)
                    .map(|(id, entry)| (*id, entry.attempt))
                    .collect()
            };

            for (job_id, attempt) in due {
                if cancel.is_cancelled() {
                    break;
                }
                self.poll_once(job_id, attempt).await;
            }
        }
    }

    /// One poll step for one job. Storage-first: a job another path already
    /// finalized is dropped from the schedule without any external call.
    async fn poll_once(&self, job_id: DbId, attempt: u32) {
        let job = match JobRepo::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id, "Scheduled job vanished, unscheduling");
                self.unschedule_poll(job_id).await;
                return;
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Poll read failed, will retry");
                self.schedule_poll(job_id, attempt + 1).await;
                return;
            }
        };

        if job.is_terminal() {
            // A callback (or another instance) won the transition. The
            // outcome may still be undelivered after a failed send, so run
            // the race-safe delivery path before dropping the job.
            self.unschedule_poll(job_id).await;
            delivery::deliver_outcome(&self.pool, &self.notifier, job_id).await;
            return;
        }

        if let Err(e) = self.resolve(&job, None, attempt).await {
            tracing::error!(job_id, error = %e, "Poll resolution failed");
        }
    }

    // -----------------------------------------------------------------
    // Completion (shared by poll and callback)
    // -----------------------------------------------------------------

    /// Handle an inbound generation callback payload.
    ///
    /// A payload with no extractable task reference is acknowledged and
    /// dropped by contract (an error status would trigger retry storms from
    /// the generation service); it must not produce error-severity logs.
    pub async fn handle_callback(&self, payload: &serde_json::Value) -> Result<(), CoreError> {
        let Some(task_ref) = extract_task_ref(payload) else {
            tracing::warn!(payload = %payload, "Callback without task reference, ignoring");
            return Ok(());
        };

        let job = JobRepo::find_by_task_id(&self.pool, &task_ref.task_id)
            .await
            .map_err(as_transient)?;
        let Some(job) = job else {
            tracing::warn!(task_id = %task_ref.task_id, "Callback for unknown task, ignoring");
            return Ok(());
        };

        if job.is_terminal() {
            // Duplicate or late callback. The transition is settled, but
            // the delivery may not be; attempt it (a no-op when the job was
            // already delivered or another path holds the claim).
            tracing::debug!(job_id = job.id, "Callback for already-final job");
            delivery::deliver_outcome(&self.pool, &self.notifier, job.id).await;
            return Ok(());
        }

        tracing::info!(job_id = job.id, task_id = %task_ref.task_id, "Processing callback");
        self.resolve(&job, task_ref.status, 0).await
    }

    /// Drive one non-terminal job forward given an optional status hint
    /// from a callback. Without a terminal hint the authoritative status is
    /// fetched from the generation API.
    async fn resolve(
        &self,
        job: &Job,
        hint: Option<TaskStatus>,
        attempt: u32,
    ) -> Result<(), CoreError> {
        let status = match hint.filter(|s| s.is_terminal()) {
            Some(status) => status,
            None => {
                let Some(task_id) = job.external_task_id.as_deref() else {
                    // Submission never completed; the watchdog will time
                    // this job out.
                    return Ok(());
                };
                match self.gen.task_status(task_id).await {
                    Ok(status) => status,
                    Err(err) => {
                        let classified = classify_gen_error(err);
                        if classified.is_retryable() {
                            tracing::warn!(
                                job_id = job.id,
                                error = %classified,
                                "Status poll failed, backing off"
                            );
                            self.schedule_poll(job.id, attempt + 1).await;
                            return Ok(());
                        }
                        self.finalize_failed(job.id, JobStatus::Failed, &classified.to_string())
                            .await;
                        return Ok(());
                    }
                }
            }
        };

        match status {
            TaskStatus::Pending | TaskStatus::Processing => {
                self.schedule_poll(job.id, attempt + 1).await;
            }
            TaskStatus::Done(result) => {
                self.finalize_done(job.id, &result).await;
            }
            TaskStatus::Failed(reason) => {
                self.finalize_failed(job.id, JobStatus::Failed, &reason).await;
            }
        }
        Ok(())
    }

    /// Terminal success: persist the result, commit the charge, deliver.
    /// Every step is idempotent or race-guarded, so the losing path of a
    /// callback-vs-poll race degrades to a no-op.
    async fn finalize_done(&self, job_id: DbId, result: &serde_json::Value) {
        self.unschedule_poll(job_id).await;

        match JobRepo::complete(&self.pool, job_id, result).await {
            Ok(true) => {
                tracing::info!(job_id, "Job completed");
                self.settle_charge(job_id, JobStatus::Done).await;
            }
            Ok(false) => {
                tracing::debug!(job_id, "Job was already finalized elsewhere");
                self.settle_as_stored(job_id).await;
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to persist completion");
                return;
            }
        }

        delivery::deliver_outcome(&self.pool, &self.notifier, job_id).await;
    }

    /// Terminal failure (failed / timeout / cancelled): persist, refund,
    /// deliver the failure notice.
    pub async fn finalize_failed(&self, job_id: DbId, status: JobStatus, reason: &str) {
        self.unschedule_poll(job_id).await;

        match JobRepo::finalize_failure(&self.pool, job_id, status, reason).await {
            Ok(true) => {
                tracing::info!(job_id, status = status.name(), reason, "Job finalized");
                self.settle_charge(job_id, status).await;
            }
            Ok(false) => {
                tracing::debug!(job_id, "Job was already finalized elsewhere");
                self.settle_as_stored(job_id).await;
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to persist failure");
                return;
            }
        }

        delivery::deliver_outcome(&self.pool, &self.notifier, job_id).await;
    }

    /// The terminal CAS was lost to a racing path: whatever status that
    /// winner stored decides the settlement, never the status this caller
    /// intended. A callback racing the watchdog must not commit the charge
    /// for a job the watchdog just timed out.
    async fn settle_as_stored(&self, job_id: DbId) {
        match JobRepo::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) if job.is_terminal() => {
                self.settle_charge(job_id, job.status()).await;
            }
            Ok(_) => {
                tracing::warn!(job_id, "Lost the terminal race to a non-terminal row, skipping");
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to re-read job for settlement");
            }
        }
    }

    /// Commit on success, refund on any failing terminal status. Both
    /// ledger operations are idempotent, so racing finalizers are safe.
    async fn settle_charge(&self, job_id: DbId, status: JobStatus) {
        let charge_key = charge_key_for_job(job_id);
        let result = match status {
            JobStatus::Done => ChargeRepo::commit(&self.pool, &charge_key).await,
            _ => ChargeRepo::refund(&self.pool, &charge_key).await,
        };
        match result {
            Ok(true) => tracing::info!(job_id, status = status.name(), "Charge settled"),
            // Free job, or a racing finalizer settled it first.
            Ok(false) => tracing::debug!(job_id, "No reserved charge to settle"),
            Err(e) => tracing::error!(job_id, error = %e, "Charge settlement failed"),
        }
    }
}

/// Map a generation API error into the domain taxonomy: 5xx and transport
/// failures are retryable, 4xx is a terminal business rejection.
fn classify_gen_error(err: GenApiError) -> CoreError {
    match err.status() {
        Some(status) if (400..500).contains(&status) => CoreError::UpstreamTerminal {
            status,
            message: err.to_string(),
        },
        Some(status) => CoreError::UpstreamRetryable {
            status,
            message: err.to_string(),
        },
        None => match err {
            GenApiError::UnknownShape(body) => CoreError::ProtocolMalformed(body),
            other => CoreError::UpstreamRetryable {
                status: 0,
                message: other.to_string(),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sqlx::PgPool;

    use atelier_db::models::status::ChargeStatus;
    use atelier_db::repositories::UserRepo;

    /// Coordinator wired to unreachable endpoints: database effects are
    /// real, every outbound send fails fast.
    fn offline_coordinator(pool: PgPool) -> Arc<JobCoordinator> {
        JobCoordinator::new(
            pool,
            GenApi::new("http://127.0.0.1:9/api".into(), "test-key".into()),
            Arc::new(Notifier::new("http://127.0.0.1:9", "test-token")),
            Decimal::new(500, 2),
            "http://127.0.0.1:9/internal/generation-callback".into(),
        )
    }

    /// A finalizer that loses the terminal race must settle the charge by
    /// the status actually stored, not the one it wanted to write. Here the
    /// watchdog timed the job out first; a late "done" result must leave
    /// the charge refunded, never committed.
    #[sqlx::test(migrations = "../db/migrations")]
    async fn losing_finalizer_settles_by_the_stored_status(pool: PgPool) {
        let coordinator = offline_coordinator(pool.clone());
        let user = UserRepo::get_or_create(&pool, 777_001).await.unwrap();
        let job =
            JobRepo::submit(&pool, user.id, "flux-dev", &serde_json::json!({})).await.unwrap();
        let key = charge_key_for_job(job.id);
        ChargeRepo::reserve(&pool, &key, user.id, Decimal::new(500, 2)).await.unwrap();

        assert!(JobRepo::finalize_failure(&pool, job.id, JobStatus::Timeout, "generation timed out")
            .await
            .unwrap());

        coordinator.finalize_done(job.id, &serde_json::json!({"url": "late"})).await;

        let row = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
        assert_eq!(row.status(), JobStatus::Timeout);
        let charge = ChargeRepo::find(&pool, &key).await.unwrap().unwrap();
        assert_eq!(charge.status(), ChargeStatus::Refunded);
    }

    /// A duplicate callback for a job that is final but whose outcome never
    /// reached the user must drive a fresh delivery attempt rather than
    /// being dropped.
    #[sqlx::test(migrations = "../db/migrations")]
    async fn late_callback_for_final_undelivered_job_retries_delivery(pool: PgPool) {
        let coordinator = offline_coordinator(pool.clone());
        let user = UserRepo::get_or_create(&pool, 777_002).await.unwrap();
        let job =
            JobRepo::submit(&pool, user.id, "flux-dev", &serde_json::json!({})).await.unwrap();
        JobRepo::mark_submitted(&pool, job.id, "task-late", None).await.unwrap();
        JobRepo::complete(&pool, job.id, &serde_json::json!({"url": "a"})).await.unwrap();
        sqlx::query("UPDATE jobs SET updated_at = NOW() - INTERVAL '10 minutes' WHERE id = $1")
            .bind(job.id)
            .execute(&pool)
            .await
            .unwrap();
        let before = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap().updated_at;

        coordinator
            .handle_callback(&serde_json::json!({"task_id": "task-late", "status": "done"}))
            .await
            .unwrap();

        // The delivery claim was taken (updated_at advanced) and released
        // again when the send failed, leaving the job retryable.
        let row = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
        assert!(row.updated_at > before);
        assert!(row.delivered_at.is_none());
        assert!(row.delivering_at.is_none());
    }

    #[test]
    fn gen_errors_classify_by_status_class() {
        let terminal = classify_gen_error(GenApiError::Api {
            status: 402,
            body: "insufficient credits".into(),
        });
        assert_matches!(terminal, CoreError::UpstreamTerminal { status: 402, .. });
        assert!(terminal.is_terminal());

        let retryable = classify_gen_error(GenApiError::Api {
            status: 503,
            body: "overloaded".into(),
        });
        assert_matches!(retryable, CoreError::UpstreamRetryable { status: 503, .. });
        assert!(retryable.is_retryable());
    }

    #[test]
    fn unknown_shapes_classify_as_malformed() {
        let err = classify_gen_error(GenApiError::UnknownShape("{}".into()));
        assert_matches!(err, CoreError::ProtocolMalformed(_));
        assert!(!err.is_retryable());
    }
}
