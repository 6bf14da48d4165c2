//! Atelier API server library.
//!
//! Exposes the building blocks (config, state, error handling, leader
//! election, admission queue, job coordinator, routes) so integration tests
//! and the binary entrypoint can both access them.

pub mod admission;
pub mod background;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod leader;
pub mod notifier;
pub mod router;
pub mod routes;
pub mod state;
