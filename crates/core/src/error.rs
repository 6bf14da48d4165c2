//! Domain error taxonomy.
//!
//! Every fallible operation in the coordination layer classifies its failure
//! into one of these variants; the classification decides whether the caller
//! retries in place, finalizes the job, or silently stands down.

use crate::types::DbId;

/// Domain-level error shared across crates.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Database or network blip. Retried locally, never surfaced to the
    /// external caller.
    #[error("Transient infrastructure error: {0}")]
    TransientInfra(String),

    /// The upstream generation service returned a retryable (5xx) failure.
    #[error("Upstream retryable error ({status}): {message}")]
    UpstreamRetryable { status: u16, message: String },

    /// The upstream generation service rejected the request for a business
    /// reason (4xx). The job is finalized as failed and the charge refunded.
    #[error("Upstream terminal error ({status}): {message}")]
    UpstreamTerminal { status: u16, message: String },

    /// A payload that could not be parsed into any known shape. Acknowledged
    /// to the sender, logged, and otherwise ignored.
    #[error("Malformed payload: {0}")]
    ProtocolMalformed(String),

    /// Another code path (or another instance) already owns the side effect.
    /// A silent no-op, not a failure.
    #[error("Lost the race for job {0}, another path is delivering")]
    RaceLost(DbId),

    /// Input rejected before any external call was made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The user's balance cannot cover the reservation. No partial charge
    /// was written.
    #[error("Insufficient funds for user {user_id}")]
    InsufficientFunds { user_id: DbId },

    /// An entity lookup came up empty.
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// Anything else. Logged at error severity where it is handled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the operation that produced this error should be retried in
    /// place (backoff and try again) rather than finalized.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientInfra(_) | CoreError::UpstreamRetryable { .. }
        )
    }

    /// Whether this error should finalize the job as failed, refunding the
    /// reserved charge and notifying the user.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamTerminal { .. } | CoreError::Validation(_)
        )
    }
}
