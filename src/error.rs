//! Engine error types and HTTP reject mapping.
//!
//! [`Reject`] is the terminal outcome of the HTTP parser. Each variant maps
//! to a literal status code and a canned response that the host writes
//! before closing the connection. [`EngineError`] covers startup failures;
//! the pub/sub and handshake layers keep their own error types.

/// Canned `400 Bad Http Request` response.
pub const RESPONSE_400: &[u8] =
    b"HTTP/1.1 400 Bad Http Request\r\nConnection: closed\r\nContent-Length: 16\r\n\r\nBad Http Request";

/// Canned `413 Entity Too Large` response.
pub const RESPONSE_413: &[u8] =
    b"HTTP/1.1 413 Entity Too Large\r\nConnection: closed\r\nContent-Length: 16\r\n\r\nEntity Too Large";

/// Canned `502 Internal Error` response.
pub const RESPONSE_502: &[u8] =
    b"HTTP/1.1 502 Internal Error\r\nConnection: closed\r\nContent-Length: 14\r\n\r\nInternal Error";

/// Terminal HTTP parse failure.
///
/// Every reject implies "write the canned response, then close".
///
/// | Variant          | Status | Cause                                      |
/// |------------------|--------|--------------------------------------------|
/// | `BadRequest`     | 400    | malformed request line, headers, no Host   |
/// | `EntityTooLarge` | 413    | head buffer full, body over the ceiling    |
/// | `InternalError`  | 502    | spool allocation or write failure          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Reject {
    /// Malformed request line or headers, or a missing `Host` header.
    #[error("bad http request")]
    BadRequest,

    /// Head or body exceeded a configured limit.
    #[error("entity too large")]
    EntityTooLarge,

    /// Overflow storage could not be created or written.
    #[error("internal error")]
    InternalError,
}

impl Reject {
    /// Returns the HTTP status code for this reject.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::EntityTooLarge => 413,
            Self::InternalError => 502,
        }
    }

    /// Returns the exact bytes to write to the peer before closing.
    #[must_use]
    pub const fn canned_response(&self) -> &'static [u8] {
        match self {
            Self::BadRequest => RESPONSE_400,
            Self::EntityTooLarge => RESPONSE_413,
            Self::InternalError => RESPONSE_502,
        }
    }
}

/// Engine-level error enum.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}
