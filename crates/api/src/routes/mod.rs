//! HTTP route modules.

pub mod callback;
pub mod health;
pub mod webhook;
