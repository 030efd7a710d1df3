//! Protocol constants and connection addressing helpers.

/// `<type>` token of relay-generated error messages.
pub const ERROR_TYPE: &str = "error";

/// Sole param of the error sent back when a destination is not connected.
pub const NOT_FOUND: &str = "not_found";

/// Port the relay listens on when none is configured.
pub const DEFAULT_PORT: u16 = 8000;

/// Extracts the claimed identifier from a connection request path.
///
/// The path is split on `/`, the leading (empty) segment is discarded and the
/// next segment is the identifier. Anything after it is ignored, as is a
/// query string. Returns `None` when that segment is missing or empty.
///
/// # Examples
///
/// ```
/// use rdv_common::types::identifier_from_path;
/// assert_eq!(identifier_from_path("/alice"), Some("alice"));
/// assert_eq!(identifier_from_path("/alice/extra?x=1"), Some("alice"));
/// assert_eq!(identifier_from_path("/"), None);
/// ```
#[must_use]
pub fn identifier_from_path(path: &str) -> Option<&str> {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    let mut segments = path.split('/');
    segments.next();
    segments.next().filter(|s| !s.is_empty())
}

/// Builds the URL a client connects to in order to claim `identifier`.
///
/// # Examples
///
/// ```
/// use rdv_common::types::signaling_url;
/// assert_eq!(signaling_url("ws://localhost:8000", "alice"), "ws://localhost:8000/alice");
/// assert_eq!(signaling_url("wss://relay.example/", "bob"), "wss://relay.example/bob");
/// ```
#[must_use]
pub fn signaling_url(base: &str, identifier: &str) -> String {
    let mut url = String::with_capacity(base.len() + 1 + identifier.len());
    url.push_str(base);
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(identifier);
    url
}
