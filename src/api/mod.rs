//! HTTP API: command endpoints and the per-task event stream.

pub mod error;
pub mod routes;
pub mod state;
pub mod stream;

pub use routes::router;
pub use state::AppState;
