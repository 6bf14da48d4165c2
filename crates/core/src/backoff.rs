//! Capped exponential backoff for the polling loop and submission retries.

use std::time::Duration;

/// Base delay for the first retry.
pub const POLL_BASE_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on any single delay.
pub const POLL_MAX_DELAY: Duration = Duration::from_secs(60);

/// Delay before attempt `attempt` (0-based), doubling from `base` and capped
/// at `cap`. Attempt 0 waits `base`, attempt 1 waits `2 * base`, and so on.
pub fn delay_for_attempt(attempt: u32, base: Duration, cap: Duration) -> Duration {
    // Saturate the shift so large attempt counts cannot overflow.
    let factor = 1u64 << attempt.min(16);
    let delay = base.saturating_mul(factor.min(u32::MAX as u64) as u32);
    delay.min(cap)
}
