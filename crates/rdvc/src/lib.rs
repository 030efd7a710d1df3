//! Signaling client for the rendezvous relay: one reconnecting WebSocket,
//! with inbound messages dispatched per peer.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Exponential backoff with jitter for reconnection.
pub mod backoff;
/// CLI parsing and client configuration.
pub mod config;
/// Error types for the signaling client.
pub mod error;
/// Relay connection manager and per-peer dispatch.
pub mod signaling;

pub use config::ClientConfig;
pub use error::RdvcError;
pub use signaling::{ConnStatus, Inbound, Inbox, PeerReceiver, Signaling};
