//! Rendezvous relay server: routes signaling messages between WebSocket
//! clients addressed by identifier.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Per-connection routing logic.
pub mod dispatch;
/// Error types for relay server operations.
pub mod error;
/// Prometheus metrics collection and health endpoints.
pub mod metrics;
/// Identifier-based routing table for connected clients.
pub mod registry;
/// Accept loop and shared server state.
pub mod server;
/// TLS certificate loading.
pub mod tls;

pub use connection::handle_connection;
pub use server::{run, run_until, ServerState};
