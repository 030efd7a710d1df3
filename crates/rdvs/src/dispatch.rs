//! Per-connection routing logic, independent of the WebSocket transport.
//!
//! A [`Dispatcher`] owns one connection's registry entry for as long as the
//! connection is active. Each inbound text frame is either forwarded to the
//! addressed peer's queue or answered with a `not_found` error that the
//! caller sends back on the originating connection.
//!
//! A destination whose queue is full has stopped keeping up. It is evicted:
//! its entry is removed and its connection task is told to terminate.

use crate::error::RdvsError;
use crate::metrics::counters;
use crate::registry::{ConnHandle, Registry};
use rdv_common::message::{one_line, Message};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Lifecycle of a relayed connection. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted, identifier known, not yet registered.
    Connecting,
    /// Registered and relaying.
    Active,
    /// Deregistered; no further frames are processed.
    Closed,
}

/// What became of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Queued for delivery to the destination's connection.
    Forwarded {
        /// Identifier the message was addressed to.
        dest: String,
    },
    /// The destination is not connected, or was evicted because its queue
    /// was full. `reply` must be sent back on the originating connection.
    NotFound {
        /// Serialized `error not_found` message.
        reply: String,
    },
}

/// Routing state for one connection.
#[derive(Debug)]
pub struct Dispatcher {
    identifier: String,
    handle: ConnHandle,
    registry: Arc<Registry>,
    state: ConnState,
}

impl Dispatcher {
    /// Creates a dispatcher for a connection that claimed `identifier`.
    #[must_use]
    pub fn new(identifier: String, handle: ConnHandle, registry: Arc<Registry>) -> Self {
        Self {
            identifier,
            handle,
            registry,
            state: ConnState::Connecting,
        }
    }

    /// Identifier this connection claimed.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnState {
        self.state
    }

    /// Registers the connection and starts relaying. Returns `true` if an
    /// earlier connection held the identifier and was displaced.
    pub fn activate(&mut self) -> bool {
        if self.state != ConnState::Connecting {
            return false;
        }
        let displaced = self
            .registry
            .register(&self.identifier, self.handle.clone())
            .is_some();
        if displaced {
            counters::registrations_displaced_total();
            warn!(client = %self.identifier, "identifier taken over by a new connection");
        }
        self.state = ConnState::Active;
        displaced
    }

    /// Processes one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RdvsError::Malformed`] if the frame does not parse; the
    /// dispatcher is closed before returning. Returns
    /// [`RdvsError::ConnectionClosed`] if called when not active.
    pub fn handle_text(&mut self, raw: &str) -> Result<Outcome, RdvsError> {
        if self.state != ConnState::Active {
            return Err(RdvsError::ConnectionClosed);
        }
        debug!("client {} >> {}", self.identifier, one_line(raw));

        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                self.close();
                return Err(e.into());
            }
        };

        let dest = message.destination().to_owned();
        let Some(dest_handle) = self.registry.lookup(&dest) else {
            return Ok(self.not_found(&dest));
        };

        let delivered = message.readdress(&self.identifier).serialize();
        debug!("client {} << {}", dest, one_line(&delivered));
        match dest_handle.tx.try_send(delivered) {
            Ok(()) => {
                counters::messages_relayed_total();
                Ok(Outcome::Forwarded { dest })
            }
            Err(TrySendError::Full(_)) => {
                counters::messages_dropped_total("queue_full");
                warn!(from = %self.identifier, to = %dest, "delivery queue full, evicting destination");
                self.registry.unregister(&dest, dest_handle.conn_id);
                dest_handle.evict();
                Ok(self.not_found(&dest))
            }
            Err(TrySendError::Closed(_)) => {
                // The destination is shutting down but has not deregistered yet.
                self.registry.unregister(&dest, dest_handle.conn_id);
                Ok(self.not_found(&dest))
            }
        }
    }

    fn not_found(&self, dest: &str) -> Outcome {
        counters::messages_not_found_total();
        let reply = Message::not_found(dest).serialize();
        debug!("client {} << {}", self.identifier, one_line(&reply));
        Outcome::NotFound { reply }
    }

    /// Deregisters the connection. Idempotent; leaves a newer connection
    /// that took over the identifier untouched.
    pub fn close(&mut self) {
        if self.state == ConnState::Active
            && !self
                .registry
                .unregister(&self.identifier, self.handle.conn_id)
        {
            info!(client = %self.identifier, "identifier no longer registered to this connection");
        }
        self.state = ConnState::Closed;
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}
