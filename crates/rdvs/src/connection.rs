use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::RdvsError;
use crate::metrics::{counters, gauges, histograms};
use crate::registry::ConnHandle;
use crate::server::ServerState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rdv_common::types::identifier_from_path;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsRecv<S> = SplitStream<WebSocketStream<S>>;

/// Time allowed for the closing frame to reach the peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Handshake refusal for a request path without an identifier.
fn missing_identifier_response() -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some("request path must name an identifier".to_string()));
    *resp.status_mut() = StatusCode::BAD_REQUEST;
    resp
}

/// Complete the WebSocket handshake, capturing the identifier claimed in the
/// request path.
async fn accept_websocket<S>(
    stream: S,
    config: &ServerConfig,
) -> Result<(WebSocketStream<S>, String), RdvsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_message_size),
        ..WebSocketConfig::default()
    };

    let claimed = Arc::new(OnceLock::new());
    let claimed_cell = Arc::clone(&claimed);
    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        move |req: &Request, resp: Response| match identifier_from_path(req.uri().path()) {
            Some(identifier) => {
                let _ = claimed_cell.set(identifier.to_owned());
                Ok(resp)
            }
            None => Err(missing_identifier_response()),
        },
        Some(ws_config),
    )
    .await?;

    let identifier = claimed.get().cloned().ok_or(RdvsError::MissingIdentifier)?;
    Ok((ws_stream, identifier))
}

/// Drive the relay loop of an active connection until it ends.
///
/// Returns `Ok(())` on a clean close by the peer.
async fn run_message_loop<S>(
    ws_tx: &mut WsSink<S>,
    ws_rx: &mut WsRecv<S>,
    deliver_rx: &mut mpsc::Receiver<String>,
    dispatcher: &mut Dispatcher,
    config: &ServerConfig,
) -> Result<(), RdvsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let period = Duration::from_secs(config.ping_interval);
    let mut ping_interval = interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(raw))) => {
                        let start = Instant::now();
                        if let Outcome::NotFound { reply } = dispatcher.handle_text(&raw)? {
                            ws_tx.send(Message::Text(reply)).await?;
                        }
                        histograms::relay_latency_seconds(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        return Err(RdvsError::BinaryFrame(data.len()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Err(e)) => return Err(RdvsError::WebSocket(e)),
                }
            }
            Some(text) = deliver_rx.recv() => {
                ws_tx.send(Message::Text(text)).await?;
            }
            _ = ping_interval.tick() => {
                if let Err(e) = ws_tx.send(Message::Ping(Vec::new())).await {
                    debug!("failed to send ping: {}", e);
                }
            }
        }
    }
}

/// Close code sent to a peer, or `None` when the fault leaves nothing to say.
fn close_code(err: &RdvsError) -> Option<CloseCode> {
    if err.is_protocol_violation() {
        Some(CloseCode::Invalid)
    } else if matches!(err, RdvsError::Evicted) {
        Some(CloseCode::Again)
    } else {
        None
    }
}

/// Serve one accepted connection: handshake, register, relay, deregister.
///
/// Every error ends only this connection. A connection whose delivery queue
/// overflows is evicted, even while blocked writing to a stalled peer.
///
/// # Errors
///
/// Returns the fault that terminated the connection: a failed handshake, a
/// malformed or binary frame, or a transport error.
pub async fn handle_connection<S>(
    stream: S,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RdvsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (ws_stream, identifier) = accept_websocket(stream, &state.config).await?;

    let (deliver_tx, mut deliver_rx) = mpsc::channel::<String>(state.config.queue_depth);
    let handle = ConnHandle::new(state.next_conn_id(), deliver_tx);
    let eviction = handle.eviction();
    let mut dispatcher = Dispatcher::new(identifier, handle, Arc::clone(&state.registry));
    dispatcher.activate();

    info!(%peer_addr, "client {} connected", dispatcher.identifier());
    gauges::inc_connections_active();

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let result = tokio::select! {
        result = run_message_loop(
            &mut ws_tx,
            &mut ws_rx,
            &mut deliver_rx,
            &mut dispatcher,
            &state.config,
        ) => result,
        () = eviction.notified() => Err(RdvsError::Evicted),
    };

    dispatcher.close();
    gauges::dec_connections_active();

    if let Err(e) = &result {
        counters::connections_failed_total(e.reason());
        warn!(%peer_addr, "client {} failed: {}", dispatcher.identifier(), e);
        if let Some(code) = close_code(e) {
            let close = CloseFrame {
                code,
                reason: e.to_string().into(),
            };
            let sent =
                tokio::time::timeout(CLOSE_TIMEOUT, ws_tx.send(Message::Close(Some(close)))).await;
            if !matches!(sent, Ok(Ok(()))) {
                debug!(%peer_addr, "close frame not delivered");
            }
        }
    }
    info!(%peer_addr, "client {} disconnected", dispatcher.identifier());

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn missing_identifier_is_bad_request() {
        let resp = missing_identifier_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.body().as_deref().unwrap().contains("identifier"));
    }

    #[test]
    fn close_codes_by_fault() {
        assert_eq!(close_code(&RdvsError::BinaryFrame(3)), Some(CloseCode::Invalid));
        assert_eq!(close_code(&RdvsError::Evicted), Some(CloseCode::Again));
        assert_eq!(close_code(&RdvsError::ConnectionClosed), None);
    }

    #[tokio::test]
    async fn handshake_extracts_identifier_from_path() {
        let (client, server) = tokio::io::duplex(4096);
        let state = Arc::new(ServerState::new(ServerConfig::default(), None));

        let server_task = tokio::spawn(async move {
            accept_websocket(server, &state.config)
                .await
                .map(|(_, id)| id)
        });
        let (_ws, _) = tokio_tungstenite::client_async("ws://localhost/alice/ignored", client)
            .await
            .unwrap();

        assert_eq!(server_task.await.unwrap().unwrap(), "alice");
    }

    #[tokio::test]
    async fn handshake_without_identifier_is_refused() {
        let (client, server) = tokio::io::duplex(4096);
        let config = ServerConfig::default();

        let server_task = tokio::spawn(async move { accept_websocket(server, &config).await });
        let client_result = tokio_tungstenite::client_async("ws://localhost/", client).await;

        assert!(client_result.is_err());
        assert!(server_task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn connection_deregisters_after_peer_closes() {
        let (client, server) = tokio::io::duplex(4096);
        let registry = Arc::new(Registry::new());
        let state = Arc::new(ServerState::with_registry(
            ServerConfig::default(),
            None,
            Arc::clone(&registry),
        ));

        let peer_addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let server_task = tokio::spawn(handle_connection(server, peer_addr, state));
        let (mut ws, _) = tokio_tungstenite::client_async("ws://localhost/bob", client)
            .await
            .unwrap();

        ws.send(Message::Text("nobody offer\n".into())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::Text("nobody error not_found\n".into()));
        assert!(registry.lookup("bob").is_some());

        ws.close(None).await.unwrap();
        server_task.await.unwrap().unwrap();
        assert!(registry.lookup("bob").is_none());
    }

    #[tokio::test]
    async fn evicted_connection_terminates() {
        let (client, server) = tokio::io::duplex(4096);
        let registry = Arc::new(Registry::new());
        let state = Arc::new(ServerState::with_registry(
            ServerConfig::default(),
            None,
            Arc::clone(&registry),
        ));

        let peer_addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let server_task = tokio::spawn(handle_connection(server, peer_addr, state));
        let (mut ws, _) = tokio_tungstenite::client_async("ws://localhost/carol", client)
            .await
            .unwrap();

        ws.send(Message::Text("nobody offer\n".into())).await.unwrap();
        ws.next().await.unwrap().unwrap();
        registry.lookup("carol").unwrap().evict();

        let result = tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RdvsError::Evicted)));
        assert!(registry.lookup("carol").is_none());

        let Some(Ok(Message::Close(Some(frame)))) = ws.next().await else {
            panic!("expected close frame");
        };
        assert_eq!(frame.code, CloseCode::Again);
    }
}
