//! HTTP to WebSocket upgrade handshake.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::http::Request;

/// GUID appended to the client key before hashing (RFC6455 section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WS_VERSION: &str = "13";

/// Reason an upgrade request cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// Upgrades must use `GET`.
    #[error("upgrade requires GET, got {0}")]
    Method(String),

    /// `Upgrade: websocket` or `Sec-WebSocket-Key` is missing.
    #[error("not a websocket upgrade request")]
    NotUpgrade,

    /// The client asked for a protocol version other than 13.
    #[error("unsupported websocket version {0}")]
    UnsupportedVersion(String),
}

/// Computes `Sec-WebSocket-Accept` for a client key.
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Validates an upgrade request and builds the `101 Switching Protocols`
/// response.
///
/// # Errors
///
/// Returns [`HandshakeError`] if the request is not an acceptable upgrade.
pub fn upgrade_response(request: &Request) -> Result<Vec<u8>, HandshakeError> {
    if !request.method().eq_ignore_ascii_case("GET") {
        return Err(HandshakeError::Method(request.method().to_string()));
    }
    if !request.is_websocket_upgrade() {
        return Err(HandshakeError::NotUpgrade);
    }
    if let Some(version) = request.header("SEC-WEBSOCKET-VERSION")
        && version.trim() != WS_VERSION
    {
        return Err(HandshakeError::UnsupportedVersion(version.to_string()));
    }
    let key = request
        .header("SEC-WEBSOCKET-KEY")
        .ok_or(HandshakeError::NotUpgrade)?;

    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
    .into_bytes())
}
