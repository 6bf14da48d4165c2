//! Background maintenance tasks that run on the ACTIVE instance.

pub mod event_retention;
