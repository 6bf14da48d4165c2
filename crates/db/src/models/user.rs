//! End-user entity model.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

use atelier_core::types::{DbId, Timestamp};

/// A row from the `users` table. `chat_id` is the messaging-platform
/// identity; `balance` is the spendable credit balance.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub chat_id: i64,
    pub balance: Decimal,
    pub created_at: Timestamp,
}
