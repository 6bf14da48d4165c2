//! Exactly-once delivery of a finished job's outcome to the user.
//!
//! Every path that finalizes a job (callback, poll, watchdog, on any
//! instance) calls [`deliver_outcome`]; the per-job soft lock in the jobs
//! table arbitrates so only one of them actually sends. The claim is
//! settled strictly after the send attempt: a crash between the two leaves
//! a stale claim that expires after [`DELIVERY_TTL_SECS`] and the message
//! is retried, which keeps the failure mode "possible duplicate after a
//! crash" rather than "silent loss".

use atelier_core::types::DbId;
use atelier_db::models::job::Job;
use atelier_db::models::status::JobStatus;
use atelier_db::repositories::JobRepo;
use atelier_db::DbPool;

use crate::notifier::Notifier;

/// Seconds after which an unsettled delivery claim may be reclaimed.
pub const DELIVERY_TTL_SECS: f64 = 300.0;

/// Attempt to deliver the outcome of `job_id`, if this caller wins the
/// delivery lock. Losing the lock is the expected outcome for one side of
/// the callback-vs-poll race and is logged at debug only.
pub async fn deliver_outcome(pool: &DbPool, notifier: &Notifier, job_id: DbId) {
    let job = match JobRepo::try_acquire_delivery(pool, job_id, DELIVERY_TTL_SECS).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::debug!(job_id, "Delivery already claimed or done, skipping");
            return;
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed to acquire delivery lock");
            return;
        }
    };

    let chat_id = match chat_id_for(pool, &job).await {
        Some(chat_id) => chat_id,
        None => {
            // Unable to address the user; release the claim so a later
            // attempt can retry once the user row is readable again.
            if let Err(e) = JobRepo::mark_delivered(pool, job_id, false).await {
                tracing::error!(job_id, error = %e, "Failed to release delivery claim");
            }
            return;
        }
    };

    let text = message_for(&job);
    let sent = match notifier.send_message(chat_id, &text).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(job_id, chat_id, error = %e, "Outcome delivery failed");
            false
        }
    };

    if let Err(e) = JobRepo::mark_delivered(pool, job_id, sent).await {
        tracing::error!(job_id, error = %e, "Failed to settle delivery claim");
        return;
    }
    if sent {
        tracing::info!(job_id, chat_id, "Outcome delivered");
    }
}

async fn chat_id_for(pool: &DbPool, job: &Job) -> Option<i64> {
    match atelier_db::repositories::UserRepo::find_by_id(pool, job.user_id).await {
        Ok(Some(user)) => Some(user.chat_id),
        Ok(None) => {
            tracing::error!(job_id = job.id, user_id = job.user_id, "Job owner not found");
            None
        }
        Err(e) => {
            tracing::error!(job_id = job.id, error = %e, "Failed to load job owner");
            None
        }
    }
}

/// Render the user-facing outcome text for a finished job.
fn message_for(job: &Job) -> String {
    match job.status() {
        JobStatus::Done => {
            let url = job.result.as_ref().and_then(result_url);
            match url {
                Some(url) => format!("Your generation is ready: {url}"),
                None => "Your generation is ready.".to_string(),
            }
        }
        JobStatus::Timeout => {
            "Your generation timed out and the charge was refunded.".to_string()
        }
        JobStatus::Cancelled => "Your generation was cancelled.".to_string(),
        _ => {
            let reason = job.error_message.as_deref().unwrap_or("unknown error");
            format!("Your generation failed: {reason}. Any charge was refunded.")
        }
    }
}

/// Pull the first output URL out of a stored result payload. The result is
/// the already-unwrapped value from the status normalizer: a bare string, a
/// `{"url": ...}` object, or an array of URLs.
fn result_url(result: &serde_json::Value) -> Option<&str> {
    result
        .as_str()
        .or_else(|| result.get("url").and_then(|v| v.as_str()))
        .or_else(|| {
            result
                .as_array()
                .and_then(|a| a.first())
                .and_then(|v| v.as_str())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_db::models::status::StatusId;

    fn job_with(status: JobStatus, result: Option<serde_json::Value>, error: Option<&str>) -> Job {
        Job {
            id: 1,
            user_id: 1,
            model_id: "test-model".into(),
            input_payload: serde_json::json!({"prompt": "hi"}),
            external_task_id: Some("t-1".into()),
            status_id: status as StatusId,
            result,
            error_message: error.map(str::to_string),
            charge_key: Some("charge:job:1".into()),
            delivering_at: None,
            delivered_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn done_message_includes_result_url() {
        // The stored result is the unwrapped payload from the status
        // normalizer, e.g. what `{"status": "done", "result": {...}}`
        // reduces to.
        let job = job_with(
            JobStatus::Done,
            Some(serde_json::json!({"url": "https://cdn.example.com/a.png"})),
            None,
        );
        assert_eq!(
            message_for(&job),
            "Your generation is ready: https://cdn.example.com/a.png"
        );
    }

    #[test]
    fn done_message_accepts_array_results() {
        let job = job_with(
            JobStatus::Done,
            Some(serde_json::json!(["https://cdn.example.com/b.png"])),
            None,
        );
        assert!(message_for(&job).contains("https://cdn.example.com/b.png"));
    }

    #[test]
    fn done_message_accepts_bare_string_results() {
        let job = job_with(
            JobStatus::Done,
            Some(serde_json::json!("https://cdn.example.com/c.png")),
            None,
        );
        assert!(message_for(&job).contains("https://cdn.example.com/c.png"));
    }

    #[test]
    fn done_message_without_extractable_url_stays_generic() {
        let job = job_with(JobStatus::Done, Some(serde_json::json!({"frames": 4})), None);
        assert_eq!(message_for(&job), "Your generation is ready.");
    }

    #[test]
    fn failure_message_carries_reason_and_refund_note() {
        let job = job_with(JobStatus::Failed, None, Some("model unavailable"));
        let text = message_for(&job);
        assert!(text.contains("model unavailable"));
        assert!(text.contains("refunded"));
    }

    #[test]
    fn timeout_message_mentions_refund() {
        let job = job_with(JobStatus::Timeout, None, None);
        assert!(message_for(&job).contains("refunded"));
    }
}
