//! Row structs and status enums for the coordination tables.

pub mod charge;
pub mod job;
pub mod lock;
pub mod processed_event;
pub mod status;
pub mod user;
