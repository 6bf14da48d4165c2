//! Repository for the `charges` ledger and user balances.
//!
//! Reserve and refund each touch two tables (ledger row + balance) and are
//! written as single CTE statements so no partial state is ever visible and
//! replays with the same key are safe no-ops. The row lock taken by the
//! status flip serializes concurrent refunds: only one statement flips
//! `reserved -> refunded`, so the balance is credited exactly once.

use rust_decimal::Decimal;
use sqlx::PgPool;

use atelier_core::types::DbId;

use crate::models::charge::{ChargeRecord, ReserveOutcome};
use crate::models::status::ChargeStatus;

const COLUMNS: &str = "charge_key, user_id, amount, status_id, created_at, updated_at";

/// Provides the idempotent reserve / commit / refund ledger operations.
pub struct ChargeRepo;

impl ChargeRepo {
    /// Reserve `amount` against the user's balance under `charge_key`.
    ///
    /// One statement, three possible outcomes:
    /// - key unseen, balance sufficient: debit + insert, `Reserved`;
    /// - key already present: nothing written, `AlreadyReserved`;
    /// - key unseen, balance too low: nothing written, `InsufficientFunds`.
    ///
    /// Two truly concurrent calls with the same key can both snapshot an
    /// empty `existing`; the loser then trips the primary-key constraint,
    /// which rolls back its debit and is reported as `AlreadyReserved`.
    pub async fn reserve(
        pool: &PgPool,
        charge_key: &str,
        user_id: DbId,
        amount: Decimal,
    ) -> Result<ReserveOutcome, sqlx::Error> {
        let result: Result<(i64, i64), sqlx::Error> = sqlx::query_as(
            "WITH existing AS ( \
                 SELECT 1 FROM charges WHERE charge_key = $1 \
             ), debit AS ( \
                 UPDATE users SET balance = balance - $3 \
                 WHERE id = $2 AND balance >= $3 \
                   AND NOT EXISTS (SELECT 1 FROM existing) \
                 RETURNING id \
             ), inserted AS ( \
                 INSERT INTO charges (charge_key, user_id, amount, status_id) \
                 SELECT $1, id, $3, $4 FROM debit \
                 RETURNING charge_key \
             ) \
             SELECT \
                 (SELECT COUNT(*) FROM inserted), \
                 (SELECT COUNT(*) FROM existing)",
        )
        .bind(charge_key)
        .bind(user_id)
        .bind(amount)
        .bind(ChargeStatus::Reserved.id())
        .fetch_one(pool)
        .await;

        match result {
            Ok((1, _)) => Ok(ReserveOutcome::Reserved),
            Ok((_, n)) if n > 0 => Ok(ReserveOutcome::AlreadyReserved),
            Ok(_) => Ok(ReserveOutcome::InsufficientFunds),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23505") => {
                Ok(ReserveOutcome::AlreadyReserved)
            }
            Err(e) => Err(e),
        }
    }

    /// Flip `reserved -> committed`. Replays (or a commit after a refund)
    /// affect zero rows and mutate nothing.
    pub async fn commit(pool: &PgPool, charge_key: &str) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            "UPDATE charges SET status_id = $2, updated_at = NOW() \
             WHERE charge_key = $1 AND status_id = $3",
        )
        .bind(charge_key)
        .bind(ChargeStatus::Committed.id())
        .bind(ChargeStatus::Reserved.id())
        .execute(pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Flip `reserved -> refunded` and credit the balance back, in one
    /// statement. A second refund with the same key flips zero rows and
    /// credits nothing.
    pub async fn refund(pool: &PgPool, charge_key: &str) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            "WITH flipped AS ( \
                 UPDATE charges SET status_id = $2, updated_at = NOW() \
                 WHERE charge_key = $1 AND status_id = $3 \
                 RETURNING user_id, amount \
             ) \
             UPDATE users u SET balance = u.balance + f.amount \
             FROM flipped f WHERE u.id = f.user_id",
        )
        .bind(charge_key)
        .bind(ChargeStatus::Refunded.id())
        .bind(ChargeStatus::Reserved.id())
        .execute(pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Look up a ledger row.
    pub async fn find(
        pool: &PgPool,
        charge_key: &str,
    ) -> Result<Option<ChargeRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM charges WHERE charge_key = $1");
        sqlx::query_as::<_, ChargeRecord>(&query)
            .bind(charge_key)
            .fetch_optional(pool)
            .await
    }

    /// Sum of currently reserved amounts, reported by /health.
    pub async fn reserved_total(pool: &PgPool) -> Result<Decimal, sqlx::Error> {
        let row: (Option<Decimal>,) = sqlx::query_as(
            "SELECT SUM(amount) FROM charges WHERE status_id = $1",
        )
        .bind(ChargeStatus::Reserved.id())
        .fetch_one(pool)
        .await?;
        Ok(row.0.unwrap_or_default())
    }
}
