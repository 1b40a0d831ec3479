//! HTTP surface: JSON API, streamed process output and the embedded UI.

pub mod api;
pub mod cookies;
pub mod embedded;
pub mod server;
pub mod stream;

pub use api::{AppState, SharedState};
pub use server::{build_router, start_server};
