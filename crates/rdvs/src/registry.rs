use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Process-unique connection number, used to tell apart two connections
/// that claimed the same identifier.
pub type ConnId = u64;

/// Handle held in the registry, used to send text to a connection.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Channel sender feeding this connection's outbound queue.
    pub tx: mpsc::Sender<String>,
    /// Number assigned to the connection when it was accepted.
    pub conn_id: ConnId,
    evict: Arc<Notify>,
}

impl ConnHandle {
    /// Creates a handle for connection `conn_id`.
    #[must_use]
    pub fn new(conn_id: ConnId, tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            conn_id,
            evict: Arc::new(Notify::new()),
        }
    }

    /// Asks the connection to terminate. The request is remembered until
    /// the connection waits on [`ConnHandle::eviction`].
    pub fn evict(&self) {
        self.evict.notify_one();
    }

    /// Signal fired by [`ConnHandle::evict`], shared by every clone of this
    /// handle.
    #[must_use]
    pub fn eviction(&self) -> Arc<Notify> {
        Arc::clone(&self.evict)
    }
}

/// Concurrent identifier → connection map.
///
/// Each operation is atomic on its own; nothing spans two operations.
/// Registering an identifier that is already taken silently displaces the
/// previous holder.
#[derive(Debug, Default)]
pub struct Registry {
    routes: DashMap<String, ConnHandle>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `identifier` to `handle`, returning the displaced handle if the
    /// identifier was already taken.
    pub fn register(&self, identifier: &str, handle: ConnHandle) -> Option<ConnHandle> {
        self.routes.insert(identifier.to_owned(), handle)
    }

    /// Look up the current handle for `identifier`.
    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<ConnHandle> {
        self.routes.get(identifier).map(|entry| entry.value().clone())
    }

    /// Remove `identifier` only if it still maps to connection `conn_id`.
    ///
    /// A displaced connection calling this on its way out leaves the newer
    /// registration in place. Returns `true` if an entry was removed.
    pub fn unregister(&self, identifier: &str, conn_id: ConnId) -> bool {
        self.routes
            .remove_if(identifier, |_k, v| v.conn_id == conn_id)
            .is_some()
    }

    /// Snapshot of the registered identifiers, in no particular order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
