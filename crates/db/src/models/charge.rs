//! Charge ledger entity model.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

use atelier_core::types::{DbId, Timestamp};

use super::status::{ChargeStatus, StatusId};

/// A row from the `charges` table, keyed by the idempotency key derived
/// from the job id.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChargeRecord {
    pub charge_key: String,
    pub user_id: DbId,
    pub amount: Decimal,
    pub status_id: StatusId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ChargeRecord {
    /// Decoded ledger status.
    pub fn status(&self) -> ChargeStatus {
        match self.status_id {
            1 => ChargeStatus::Reserved,
            2 => ChargeStatus::Committed,
            _ => ChargeStatus::Refunded,
        }
    }
}

/// Outcome of a `reserve` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Balance was debited and a reserved row created.
    Reserved,
    /// The key already exists; nothing was debited (idempotent replay).
    AlreadyReserved,
    /// Balance too low; nothing was written.
    InsufficientFunds,
}
