//! Generation job entity model.

use serde::Serialize;
use sqlx::FromRow;

use atelier_core::types::{DbId, Timestamp};

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub user_id: DbId,
    pub model_id: String,
    pub input_payload: serde_json::Value,
    pub external_task_id: Option<String>,
    pub status_id: StatusId,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub charge_key: Option<String>,
    pub delivering_at: Option<Timestamp>,
    pub delivered_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Decoded status. Falls back to `Failed` on an impossible id so a
    /// corrupted row can never be mistaken for in-flight work.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_id(self.status_id).unwrap_or(JobStatus::Failed)
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}
