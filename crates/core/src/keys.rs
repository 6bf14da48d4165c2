//! Deterministic key derivation.
//!
//! Every instance of a deployment shares one bot identity, so the leader
//! lock key is derived from the bot token: all instances compute the same
//! key without any coordination. Charge keys are derived from job ids so the
//! ledger operations for one job are idempotent by construction.

use sha2::{Digest, Sha256};

use crate::types::DbId;

/// Stable i64 lock key for a bot token.
///
/// First eight bytes of SHA-256 over the token, big-endian. Two deployments
/// with different tokens get different keys; every instance of one
/// deployment gets the same key.
pub fn lock_key_for_token(token: &str) -> i64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Idempotency key for the charge tied to a job. One job, one key, always.
pub fn charge_key_for_job(job_id: DbId) -> String {
    format!("charge:job:{job_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable_across_calls() {
        let a = lock_key_for_token("123456:some-bot-token");
        let b = lock_key_for_token("123456:some-bot-token");
        assert_eq!(a, b);
    }

    #[test]
    fn different_tokens_get_different_keys() {
        let a = lock_key_for_token("123456:token-a");
        let b = lock_key_for_token("123456:token-b");
        assert_ne!(a, b);
    }

    #[test]
    fn charge_key_embeds_the_job_id() {
        assert_eq!(charge_key_for_job(77), "charge:job:77");
        assert_ne!(charge_key_for_job(77), charge_key_for_job(78));
    }
}
