use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum RdvsError {
    /// An inbound text frame is not a well-formed signaling message.
    #[error(transparent)]
    Malformed(#[from] rdv_common::MessageError),
    /// The peer sent a binary frame; signaling is text only.
    #[error("unexpected binary frame ({0} bytes)")]
    BinaryFrame(usize),
    /// The request path carries no identifier.
    #[error("request path carries no identifier")]
    MissingIdentifier,
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TLS configuration error.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// The TLS handshake did not complete in time.
    #[error("tls handshake timed out")]
    HandshakeTimeout,
    /// The certificate file holds no PEM certificate.
    #[error("no certificate found in {}", .0.display())]
    NoCertificate(PathBuf),
    /// The key file holds no PEM private key.
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    /// The connection's delivery queue overflowed and it was evicted.
    #[error("delivery queue overflowed")]
    Evicted,
    /// The connection was already closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl RdvsError {
    /// Returns `true` for faults caused by what the peer sent, as opposed to
    /// transport failures.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::BinaryFrame(_))
    }

    /// Short label used for the failure metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::BinaryFrame(_) => "binary",
            Self::MissingIdentifier => "no_identifier",
            Self::WebSocket(_) => "websocket",
            Self::Io(_) => "io",
            Self::Tls(_) | Self::HandshakeTimeout | Self::NoCertificate(_) | Self::NoPrivateKey(_) => {
                "tls"
            }
            Self::Evicted => "evicted",
            Self::ConnectionClosed => "closed",
        }
    }
}
