//! Signaling message text codec.
//!
//! Every message travels as a single WebSocket text frame made of one header
//! line of space-separated tokens, a newline, and an opaque body:
//!
//! ```text
//! <id> <type> [<param> ...]\n<body>
//! ```
//!
//! Nothing is escaped. Header tokens must not contain spaces or newlines; the
//! body is carried verbatim and may span several lines.

use crate::types::{ERROR_TYPE, NOT_FOUND};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// A parsed signaling message.
///
/// `id` plays two roles. On a message received from a client it names the
/// destination peer ([`Message::destination`]); on a message delivered to a
/// client it names the peer that sent it ([`Message::sender`]). The relay
/// switches between the two with [`Message::readdress`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Destination identifier (inbound) or sender identifier (delivered).
    pub id: String,
    /// Opaque message type tag, the `<type>` header token.
    pub kind: String,
    /// Additional header tokens, in order.
    pub params: Vec<String>,
    /// Everything after the first newline.
    pub body: String,
}

/// Reasons a raw frame is not a well-formed message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// The header line has no space separating an id from a type.
    #[error("malformed message: header has {found} token(s), expected at least 2")]
    TooFewTokens {
        /// Number of non-empty tokens found in the header line.
        found: usize,
    },
}

impl Message {
    /// Creates a message with no params and an empty body.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            params: Vec::new(),
            body: String::new(),
        }
    }

    /// Replaces the params.
    #[must_use]
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// The relay's answer when `dest` has no live connection.
    ///
    /// # Examples
    ///
    /// ```
    /// use rdv_common::message::Message;
    /// let reply = Message::not_found("bob");
    /// assert_eq!(reply.serialize(), "bob error not_found\n");
    /// ```
    #[must_use]
    pub fn not_found(dest: &str) -> Self {
        Self::new(dest, ERROR_TYPE).with_params([NOT_FOUND])
    }

    /// Returns `true` if this is a relay-generated error message.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == ERROR_TYPE
    }

    /// Returns `true` if this is the relay's `not_found` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.is_error() && self.params.first().map(String::as_str) == Some(NOT_FOUND)
    }

    /// Destination identifier of a message received from a client.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.id
    }

    /// Sender identifier of a message delivered by the relay.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.id
    }

    /// Turns an inbound message into the one delivered to its destination,
    /// stamped with the identifier of the connection that sent it.
    #[must_use]
    pub fn readdress(mut self, sender: &str) -> Self {
        sender.clone_into(&mut self.id);
        self
    }

    /// Parses one raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] if the header line has fewer than two
    /// tokens. Tokens themselves may be empty: `" offer"` has an empty id.
    ///
    /// # Examples
    ///
    /// ```
    /// use rdv_common::message::Message;
    /// let msg = Message::parse("bob candidate audio\na=candidate:1").unwrap();
    /// assert_eq!(msg.id, "bob");
    /// assert_eq!(msg.kind, "candidate");
    /// assert_eq!(msg.params, vec!["audio"]);
    /// assert_eq!(msg.body, "a=candidate:1");
    /// ```
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let (header, body) = raw.split_once('\n').unwrap_or((raw, ""));
        let mut tokens = header.split(' ');
        let id = tokens.next().unwrap_or_default();
        let Some(kind) = tokens.next() else {
            return Err(MessageError::TooFewTokens {
                found: usize::from(!id.is_empty()),
            });
        };
        Ok(Self {
            id: id.to_owned(),
            kind: kind.to_owned(),
            params: tokens.map(str::to_owned).collect(),
            body: body.to_owned(),
        })
    }

    /// Serializes into the wire text form. The header is always followed
    /// by a newline, even when the body is empty.
    #[must_use]
    pub fn serialize(&self) -> String {
        let header_len = self.id.len()
            + 1
            + self.kind.len()
            + self.params.iter().map(|p| p.len() + 1).sum::<usize>();
        let mut out = String::with_capacity(header_len + 1 + self.body.len());
        out.push_str(&self.id);
        out.push(' ');
        out.push_str(&self.kind);
        for param in &self.params {
            out.push(' ');
            out.push_str(param);
        }
        out.push('\n');
        out.push_str(&self.body);
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl std::str::FromStr for Message {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Renders a raw frame on a single log line by escaping CR and LF.
#[must_use]
pub fn one_line(raw: &str) -> Cow<'_, str> {
    if raw.contains(['\r', '\n']) {
        Cow::Owned(raw.replace('\r', "\\r").replace('\n', "\\n"))
    } else {
        Cow::Borrowed(raw)
    }
}
