//! HTTP facade for the mule job broker.
//!
//! Translates the broker's eight operations into routes, maps broker errors
//! onto status codes (404 unknown job, 409 for every lease conflict and
//! in-flight duplicate, 400 for malformed bodies, 204 for an empty poll),
//! and carries the `Idempotency-Key` header into the enqueue protocol.

pub mod app;
pub mod error;
pub mod routes;
pub mod state;

pub use app::{router, serve};
pub use error::ApiError;
pub use state::AppState;

// Re-exported so integration code drives the exact axum version this crate
// was built against.
pub use axum;
