//! Client for the external asynchronous generation API.
//!
//! The API accepts a task, runs it asynchronously, and reports completion
//! both via polling and via an HTTP callback. Its payload field names and
//! nesting vary across versions, so [`status`] and [`callback`] normalize
//! every shape we have observed into one internal representation.

pub mod api;
pub mod callback;
pub mod status;

pub use api::{GenApi, GenApiError, SubmitResponse};
pub use callback::extract_task_ref;
pub use status::TaskStatus;
