use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by the signaling client.
#[derive(Error, Debug)]
pub enum RdvcError {
    /// The client configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The relay URL could not be turned into a WebSocket request.
    #[error("invalid relay url {url}: {source}")]
    InvalidUrl {
        /// The URL that was rejected.
        url: String,
        /// Underlying parse failure.
        #[source]
        source: tungstenite::Error,
    },
    /// The relay refused the WebSocket handshake.
    #[error("relay refused connection with HTTP {0}")]
    Refused(u16),
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Connecting to the relay took too long.
    #[error("connection attempt timed out")]
    ConnectTimeout,
    /// The relay closed the connection.
    #[error("connection closed by relay")]
    ClosedByRelay,
    /// The connection manager has stopped; nothing more can be sent.
    #[error("signaling client is shut down")]
    Shutdown,
}

impl RdvcError {
    /// Returns `true` for errors that reconnecting cannot fix.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Refused(status) => *status >= 400 && *status < 500,
            Self::Config(_) | Self::InvalidUrl { .. } | Self::Shutdown => true,
            Self::WebSocket(_) | Self::ConnectTimeout | Self::ClosedByRelay => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_fatal() {
        assert!(RdvcError::Refused(400).is_fatal());
        assert!(RdvcError::Config("x".into()).is_fatal());
    }

    #[test]
    fn transport_errors_are_retried() {
        assert!(!RdvcError::Refused(503).is_fatal());
        assert!(!RdvcError::ConnectTimeout.is_fatal());
        assert!(!RdvcError::ClosedByRelay.is_fatal());
        assert!(!RdvcError::WebSocket(tungstenite::Error::ConnectionClosed).is_fatal());
    }
}
