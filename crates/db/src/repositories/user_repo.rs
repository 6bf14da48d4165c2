//! Repository for the `users` table.

use rust_decimal::Decimal;
use sqlx::PgPool;

use atelier_core::types::DbId;

use crate::models::user::User;

const COLUMNS: &str = "id, chat_id, balance, created_at";

/// Provides user lookup and creation keyed by the messaging chat id.
pub struct UserRepo;

impl UserRepo {
    /// Fetch the user for a chat id, creating the row on first contact.
    ///
    /// `ON CONFLICT ... DO UPDATE SET chat_id = excluded.chat_id` is a
    /// no-op update that makes the statement always return the row, racing
    /// instances included.
    pub async fn get_or_create(pool: &PgPool, chat_id: i64) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (chat_id) VALUES ($1) \
             ON CONFLICT (chat_id) DO UPDATE SET chat_id = users.chat_id \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(chat_id)
            .fetch_one(pool)
            .await
    }

    /// Find a user by primary key.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Current balance for a user.
    pub async fn balance(pool: &PgPool, id: DbId) -> Result<Option<Decimal>, sqlx::Error> {
        let row: Option<(Decimal,)> = sqlx::query_as("SELECT balance FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|r| r.0))
    }
}
