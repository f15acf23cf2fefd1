//! Inbound HTTP surface: conversation lifecycle and SSE streaming.

pub mod routes;
pub mod server;
pub mod types;

pub use server::{build_router, run_server, AppState};
