#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use rdv_common::Message as Signal;
use rdvs::config::ServerConfig;
use rdvs::server::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        ..ServerConfig::default()
    }
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    start_server_with(|_| {}).await
}

pub async fn start_server_with(tweak: impl FnOnce(&mut ServerConfig)) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    tweak(&mut config);
    let state = Arc::new(ServerState::new(config, None));

    let state_clone = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = rdvs::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    (addr, state)
}

/// Wait until `identifier` is routed to a live connection.
pub async fn wait_registered(state: &ServerState, identifier: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.registry.lookup(identifier).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timeout waiting for registration");
}

/// Wait until `identifier` no longer has a registry entry.
pub async fn wait_unregistered(state: &ServerState, identifier: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.registry.lookup(identifier).is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timeout waiting for deregistration");
}

pub struct TestClient {
    pub ws: Ws,
    pub identifier: String,
}

impl TestClient {
    /// Connect as `identifier` and wait until the server has registered it.
    pub async fn connect(addr: &SocketAddr, state: &ServerState, identifier: &str) -> Self {
        let url = format!("ws://{addr}/{identifier}");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        wait_registered(state, identifier).await;
        Self {
            ws,
            identifier: identifier.to_string(),
        }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn send_signal(&mut self, signal: &Signal) {
        self.send_text(&signal.serialize()).await;
    }

    /// Next non-control message, or `None` once the connection is gone.
    pub async fn recv_message(&mut self) -> Option<Message> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timeout waiting for message");
            match msg {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(msg)) => return Some(msg),
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn recv_text(&mut self) -> String {
        match self.recv_message().await {
            Some(Message::Text(text)) => text,
            other => panic!("expected text message, got {other:?}"),
        }
    }

    pub async fn recv_signal(&mut self) -> Signal {
        Signal::parse(&self.recv_text().await).unwrap()
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.recv_message())
            .await
            .ok()
            .flatten()
    }
}
