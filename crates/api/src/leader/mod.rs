//! Leader election across process instances.
//!
//! Multiple instances of this service run concurrently during deploys but
//! share one bot identity and one generation account, so only one instance
//! may perform side-effecting work at a time. [`lock::LockController`] holds
//! the database lease; [`sync::StateSyncLoop`] turns lease transitions into
//! exactly-once init/teardown of the active-only services.

pub mod lock;
pub mod sync;

use serde::Serialize;

/// Whether this instance currently holds the leader lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    /// This instance holds the lease and runs side-effecting services.
    Active,
    /// Another instance holds the lease; this one only fast-acks traffic.
    Passive,
}
