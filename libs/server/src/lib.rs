//! HTTP surface for the index rebuild coordinator.
//!
//! Exposes rebuild control, the current snapshot and a server-sent event
//! stream of progress and summary events.

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::{AppState, FragmentRenderer, json_renderer};
