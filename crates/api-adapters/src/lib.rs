//! # API adapters
//!
//! The session hub and metrics are transport-agnostic; the REST surface and
//! the WebSocket endpoint sit behind the `web-axum` feature.

pub mod metrics;
pub mod realtime;

#[cfg(feature = "web-axum")]
pub mod error;
#[cfg(feature = "web-axum")]
pub mod extract;
#[cfg(feature = "web-axum")]
pub mod handlers;
#[cfg(feature = "web-axum")]
pub mod router;
#[cfg(feature = "web-axum")]
pub mod state;

pub use metrics::Metrics;
pub use realtime::SessionHub;

#[cfg(feature = "web-axum")]
pub use router::build_router;
#[cfg(feature = "web-axum")]
pub use state::{AppState, Backends};
