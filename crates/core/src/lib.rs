//! Shared domain types for the atelier backend.
//!
//! Everything here is runtime-agnostic: type aliases, the domain error
//! taxonomy, retry backoff arithmetic, and key derivation. The db and api
//! crates build on top of these.

pub mod backoff;
pub mod error;
pub mod keys;
pub mod types;
