//! Relay connection manager and per-peer message dispatch.
//!
//! [`Signaling::connect`] spawns a task that keeps one WebSocket open to the
//! relay, reconnecting with backoff whenever the link drops. Outbound
//! messages queue until a connection is available. Inbound messages are
//! routed by their `id` (the sending peer) to the matching
//! [`PeerReceiver`], or to the default [`Inbox`] when nobody subscribed.

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::RdvcError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rdv_common::message::{one_line, Message};
use rdv_common::types::signaling_url;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Connection status of the relay WebSocket link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Not connected; a reconnect is pending.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Registered with the relay and exchanging messages.
    Connected,
    /// The manager has exited and will not reconnect.
    Stopped,
}

/// A message received from the relay.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// The message, with `id` naming the peer that sent it.
    pub message: Message,
    /// Local timestamp when the message was received.
    pub received_at: DateTime<Utc>,
}

struct Subscription {
    token: u64,
    tx: mpsc::Sender<Inbound>,
}

/// Peer identifier → subscriber map shared by the manager and receivers.
#[derive(Default)]
struct Subscribers {
    routes: DashMap<String, Subscription>,
    next_token: AtomicU64,
}

impl Subscribers {
    fn insert(&self, peer: String, tx: mpsc::Sender<Inbound>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.routes.insert(peer, Subscription { token, tx });
        token
    }

    fn remove(&self, peer: &str, token: u64) {
        self.routes.remove_if(peer, |_, sub| sub.token == token);
    }

    /// Hands `inbound` to the subscriber for its sender. Gives the message
    /// back when there is no live subscriber.
    fn dispatch(&self, inbound: Inbound) -> Option<Inbound> {
        let peer = inbound.message.sender().to_owned();
        let (token, result) = {
            let Some(sub) = self.routes.get(&peer) else {
                return Some(inbound);
            };
            (sub.token, sub.tx.try_send(inbound))
        };
        match result {
            Ok(()) => None,
            Err(TrySendError::Full(_)) => {
                warn!(peer = %peer, "subscriber queue full, dropping message");
                None
            }
            Err(TrySendError::Closed(inbound)) => {
                self.remove(&peer, token);
                Some(inbound)
            }
        }
    }
}

/// Messages from one peer. Dropping the receiver ends the subscription;
/// later messages from that peer go to the default [`Inbox`].
pub struct PeerReceiver {
    peer: String,
    token: u64,
    rx: mpsc::Receiver<Inbound>,
    subscribers: Arc<Subscribers>,
}

impl PeerReceiver {
    /// Identifier of the peer this receiver listens to.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Next message from the peer. Returns `None` once the subscription was
    /// replaced by a newer one or the client shut down.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }
}

impl Drop for PeerReceiver {
    fn drop(&mut self) {
        self.subscribers.remove(&self.peer, self.token);
    }
}

/// Messages from peers nobody subscribed to.
pub struct Inbox {
    rx: mpsc::Receiver<Inbound>,
}

impl Inbox {
    /// Next unclaimed message. Returns `None` once the client shut down.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }
}

/// Handle to a signaling connection. Dropping it shuts the connection down.
pub struct Signaling {
    local_id: String,
    outbox_tx: mpsc::Sender<Message>,
    subscribers: Arc<Subscribers>,
    status_rx: watch::Receiver<ConnStatus>,
    inbox_depth: usize,
    _shutdown_tx: watch::Sender<()>,
}

impl Signaling {
    /// Starts the connection manager for `config.local_id`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the relay URL
    /// cannot be parsed.
    pub fn connect(config: ClientConfig) -> Result<(Self, Inbox), RdvcError> {
        config.validate().map_err(RdvcError::Config)?;
        let url = signaling_url(&config.url, &config.local_id);
        if let Err(source) = url.as_str().into_client_request() {
            return Err(RdvcError::InvalidUrl { url, source });
        }

        let (outbox_tx, outbox_rx) = mpsc::channel(config.outbox_depth);
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_depth);
        let (status_tx, status_rx) = watch::channel(ConnStatus::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let subscribers = Arc::new(Subscribers::default());

        let signaling = Self {
            local_id: config.local_id.clone(),
            outbox_tx,
            subscribers: Arc::clone(&subscribers),
            status_rx,
            inbox_depth: config.inbox_depth,
            _shutdown_tx: shutdown_tx,
        };

        tokio::spawn(connection_manager(
            config,
            url,
            outbox_rx,
            inbox_tx,
            subscribers,
            status_tx,
            shutdown_rx,
        ));

        Ok((signaling, Inbox { rx: inbox_rx }))
    }

    /// Identifier this client registers under.
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Queues `message` for the relay. Its `id` names the destination.
    ///
    /// # Errors
    ///
    /// Returns [`RdvcError::Shutdown`] if the connection manager has exited.
    pub async fn send(&self, message: Message) -> Result<(), RdvcError> {
        self.outbox_tx
            .send(message)
            .await
            .map_err(|_| RdvcError::Shutdown)
    }

    /// Routes messages from `peer` to the returned receiver, replacing any
    /// earlier subscription for the same peer.
    pub fn subscribe(&self, peer: impl Into<String>) -> PeerReceiver {
        let peer = peer.into();
        let (tx, rx) = mpsc::channel(self.inbox_depth);
        let token = self.subscribers.insert(peer.clone(), tx);
        PeerReceiver {
            peer,
            token,
            rx,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Current link status.
    #[must_use]
    pub fn status(&self) -> ConnStatus {
        *self.status_rx.borrow()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnStatus> {
        self.status_rx.clone()
    }

    /// Waits until the link reaches `want`.
    ///
    /// # Errors
    ///
    /// Returns [`RdvcError::Shutdown`] if the manager exits first.
    pub async fn wait_for_status(&self, want: ConnStatus) -> Result<(), RdvcError> {
        let mut rx = self.status_rx.clone();
        loop {
            if *rx.borrow_and_update() == want {
                return Ok(());
            }
            rx.changed().await.map_err(|_| RdvcError::Shutdown)?;
        }
    }
}

/// Connection loop with automatic reconnection and backoff.
async fn connection_manager(
    config: ClientConfig,
    url: String,
    mut outbox_rx: mpsc::Receiver<Message>,
    inbox_tx: mpsc::Sender<Inbound>,
    subscribers: Arc<Subscribers>,
    status_tx: watch::Sender<ConnStatus>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut backoff = Backoff::from_config(&config.reconnect);
    let mut unsent = None;

    loop {
        status_tx.send_replace(ConnStatus::Connecting);

        let result = connect_and_run(
            &config,
            &url,
            &mut outbox_rx,
            &inbox_tx,
            &subscribers,
            &status_tx,
            &mut shutdown_rx,
            &mut unsent,
        )
        .await;
        let was_connected = *status_tx.borrow() == ConnStatus::Connected;

        match result {
            Ok(()) => {
                info!("signaling client shut down");
                break;
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "fatal signaling error, not retrying");
                break;
            }
            Err(e) => {
                warn!(error = %e, "relay connection lost");
                status_tx.send_replace(ConnStatus::Disconnected);
                if was_connected {
                    backoff.reset();
                }
            }
        }

        let delay = backoff.next_delay();
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                info!("signaling client shut down");
                break;
            }
        }
    }

    status_tx.send_replace(ConnStatus::Stopped);
}

/// Runs one connection until it fails or shutdown is requested.
///
/// Returns `Ok(())` only on shutdown.
#[allow(clippy::too_many_arguments)]
async fn connect_and_run(
    config: &ClientConfig,
    url: &str,
    outbox_rx: &mut mpsc::Receiver<Message>,
    inbox_tx: &mpsc::Sender<Inbound>,
    subscribers: &Subscribers,
    status_tx: &watch::Sender<ConnStatus>,
    shutdown_rx: &mut watch::Receiver<()>,
    unsent: &mut Option<String>,
) -> Result<(), RdvcError> {
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url));
    let (ws, _) = tokio::select! {
        result = connect => match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(tungstenite::Error::Http(resp))) => {
                return Err(RdvcError::Refused(resp.status().as_u16()));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(RdvcError::ConnectTimeout),
        },
        _ = shutdown_rx.changed() => return Ok(()),
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    status_tx.send_replace(ConnStatus::Connected);
    info!("connected to relay as {}", config.local_id);

    if let Some(text) = unsent.take() {
        send_text(&mut ws_tx, text, unsent).await?;
    }

    let period = Duration::from_secs(config.ping_interval_s);
    let mut ping_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(raw))) => {
                        deliver(&config.local_id, &raw, inbox_tx, subscribers);
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        ws_tx.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Err(RdvcError::ClosedByRelay),
                    Some(Ok(WsMessage::Binary(data))) => {
                        debug!(len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }

            outbound = outbox_rx.recv() => {
                let Some(message) = outbound else {
                    let _ = ws_tx.close().await;
                    return Ok(());
                };
                let text = message.serialize();
                debug!("{} >> {}", config.local_id, one_line(&text));
                send_text(&mut ws_tx, text, unsent).await?;
            }

            _ = ping_interval.tick() => {
                ws_tx.send(WsMessage::Ping(Vec::new())).await?;
            }

            _ = shutdown_rx.changed() => {
                let _ = ws_tx.close().await;
                return Ok(());
            }
        }
    }
}

/// Sends `text`, keeping it for the next connection if the send fails.
async fn send_text(
    ws_tx: &mut WsSink,
    text: String,
    unsent: &mut Option<String>,
) -> Result<(), RdvcError> {
    if let Err(e) = ws_tx.send(WsMessage::Text(text.clone())).await {
        *unsent = Some(text);
        return Err(e.into());
    }
    Ok(())
}

fn deliver(
    local_id: &str,
    raw: &str,
    inbox_tx: &mpsc::Sender<Inbound>,
    subscribers: &Subscribers,
) {
    debug!("{} << {}", local_id, one_line(raw));
    let message = match Message::parse(raw) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "ignoring malformed message");
            return;
        }
    };
    let inbound = Inbound {
        message,
        received_at: Utc::now(),
    };
    let Some(inbound) = subscribers.dispatch(inbound) else {
        return;
    };
    match inbox_tx.try_send(inbound) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("inbox full, dropping message"),
        Err(TrySendError::Closed(_)) => debug!("inbound message dropped: inbox closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(raw: &str) -> Inbound {
        Inbound {
            message: Message::parse(raw).unwrap(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn dispatch_routes_by_sender() {
        let subscribers = Subscribers::default();
        let (tx, mut rx) = mpsc::channel(4);
        subscribers.insert("bob".into(), tx);

        assert!(subscribers.dispatch(inbound("bob answer\nsdp")).is_none());
        assert_eq!(rx.try_recv().unwrap().message.body, "sdp");

        let unclaimed = subscribers.dispatch(inbound("carol offer\n")).unwrap();
        assert_eq!(unclaimed.message.id, "carol");
    }

    #[test]
    fn dispatch_to_dropped_subscriber_falls_back() {
        let subscribers = Subscribers::default();
        let (tx, rx) = mpsc::channel(4);
        subscribers.insert("bob".into(), tx);
        drop(rx);

        assert!(subscribers.dispatch(inbound("bob answer\n")).is_some());
        assert!(subscribers.routes.is_empty());
    }

    #[test]
    fn stale_token_does_not_remove_newer_subscription() {
        let subscribers = Subscribers::default();
        let (old_tx, _old_rx) = mpsc::channel(4);
        let (new_tx, _new_rx) = mpsc::channel(4);
        let old = subscribers.insert("bob".into(), old_tx);
        let new = subscribers.insert("bob".into(), new_tx);

        subscribers.remove("bob", old);
        assert_eq!(subscribers.routes.get("bob").unwrap().token, new);
    }

    #[test]
    fn error_reply_reaches_subscriber_of_missing_peer() {
        let subscribers = Subscribers::default();
        let (tx, mut rx) = mpsc::channel(4);
        subscribers.insert("ghost".into(), tx);

        assert!(subscribers.dispatch(inbound("ghost error not_found\n")).is_none());
        assert!(rx.try_recv().unwrap().message.is_not_found());
    }

    #[test]
    fn malformed_inbound_is_ignored() {
        let subscribers = Subscribers::default();
        let (inbox_tx, mut inbox_rx) = mpsc::channel(4);
        deliver("alice", "garbage", &inbox_tx, &subscribers);
        assert!(inbox_rx.try_recv().is_err());

        deliver("alice", "bob offer\n", &inbox_tx, &subscribers);
        assert_eq!(inbox_rx.try_recv().unwrap().message.id, "bob");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let result = Signaling::connect(ClientConfig::new("ws://127.0.0.1:1", ""));
        assert!(matches!(result, Err(RdvcError::Config(_))));
    }

    #[tokio::test]
    async fn dropping_handle_stops_reconnecting_manager() {
        // Nothing listens on port 1; the attempt fails and is retried, so
        // dropping the handle is what stops the manager.
        let mut config = ClientConfig::new("ws://127.0.0.1:1", "alice");
        config.reconnect.initial_delay_ms = 10;
        config.reconnect.max_delay_ms = 20;
        let (signaling, _inbox) = Signaling::connect(config).unwrap();
        let mut status = signaling.status_watch();
        drop(signaling);

        tokio::time::timeout(Duration::from_secs(5), async {
            while *status.borrow_and_update() != ConnStatus::Stopped {
                if status.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }
}
