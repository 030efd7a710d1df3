use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::RdvsError;
use crate::registry::{ConnId, Registry};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// Time allowed for a client to finish the TLS handshake.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for open connections to finish after shutdown is requested.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the relay server.
pub struct ServerState {
    /// Identifier → connection registry shared by all connection tasks.
    pub registry: Arc<Registry>,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// TLS acceptor; connections are plaintext when `None`.
    pub tls: Option<TlsAcceptor>,
    next_conn_id: AtomicU64,
}

impl ServerState {
    /// Create server state with a fresh, empty registry.
    #[must_use]
    pub fn new(config: ServerConfig, tls: Option<TlsAcceptor>) -> Self {
        Self::with_registry(config, tls, Arc::new(Registry::new()))
    }

    /// Create server state around an existing registry.
    #[must_use]
    pub fn with_registry(
        config: ServerConfig,
        tls: Option<TlsAcceptor>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            registry,
            config,
            tls,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Allocate the number identifying the next accepted connection.
    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Run the accept loop until the listener fails.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RdvsError> {
    run_until(listener, state, std::future::pending()).await
}

/// Run the accept loop until `shutdown` completes.
///
/// After shutdown no new connections are accepted; open connections get
/// a grace period to finish before they are aborted.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_until<F>(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: F,
) -> Result<(), RdvsError>
where
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;
    info!(tls = state.tls.is_some(), "accepting connections on {}", local_addr);
    tokio::pin!(shutdown);
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        tasks.spawn(async move {
                            if let Err(e) = serve(stream, addr, state).await {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("connection task panicked: {}", e);
                    }
                }
            }
            () = &mut shutdown => {
                info!("shutdown signal received, draining {} connections", tasks.len());
                break;
            }
        }
    }

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "drain timeout reached with {} connections still active",
            tasks.len()
        );
        tasks.shutdown().await;
    }

    info!("server shut down gracefully");
    Ok(())
}

/// Terminate TLS if configured, then hand the stream to the relay.
async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RdvsError> {
    match state.tls.clone() {
        Some(acceptor) => {
            let tls_stream = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream))
                .await
                .map_err(|_| RdvsError::HandshakeTimeout)??;
            handle_connection(tls_stream, addr, state).await
        }
        None => handle_connection(stream, addr, state).await,
    }
}
