//! Table repositories. One unit struct per table, static async fns taking
//! `&PgPool`. Every cross-instance mutation is a single atomic statement.

mod charge_repo;
mod job_repo;
mod lock_repo;
mod processed_event_repo;
mod user_repo;

pub use charge_repo::ChargeRepo;
pub use job_repo::JobRepo;
pub use lock_repo::LockRepo;
pub use processed_event_repo::ProcessedEventRepo;
pub use user_repo::UserRepo;
