//! Parsed HTTP request and its body.

use std::io;

use bytes::Bytes;

use super::spool::{self, OverflowSink};

/// Request line and headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method as sent (e.g. `GET`).
    pub method: String,
    /// Path portion of the request target.
    pub path: String,
    /// Query string after `?`, if present.
    pub query: Option<String>,
    /// Protocol version (always starts with `HTTP`).
    pub version: String,
    /// Value of the `Host` header.
    pub host: String,
    /// Value of the `Content-Type` header.
    pub content_type: Option<String>,
    /// Declared body length, 0 when absent.
    pub content_length: u64,
    /// Every header in arrival order. Names are uppercased.
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Returns the first header named `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if the `Connection` header lists `token`.
    #[must_use]
    pub fn connection_has(&self, token: &str) -> bool {
        self.header("CONNECTION").is_some_and(|v| {
            v.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// Request body.
#[derive(Debug, Default)]
pub enum Body {
    /// No body (`Content-Length` absent or zero).
    #[default]
    Empty,
    /// Body referenced from the parse buffer.
    Buffered(Bytes),
    /// Body spooled to overflow storage, rewound to its start.
    Spooled(Box<dyn OverflowSink>),
}

impl Body {
    /// Body length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Buffered(b) => b.len() as u64,
            Self::Spooled(sink) => sink.len(),
        }
    }

    /// Returns `true` for an empty body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the body lives in overflow storage.
    #[must_use]
    pub const fn is_spooled(&self) -> bool {
        matches!(self, Self::Spooled(_))
    }

    /// Materialises the body in memory.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a spooled body cannot be read back.
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Buffered(b) => Ok(b),
            Self::Spooled(mut sink) => spool::read_to_vec(sink.as_mut()).map(Bytes::from),
        }
    }
}

/// A complete HTTP request handed to the application exactly once.
#[derive(Debug, Default)]
pub struct Request {
    /// Request line and headers.
    pub head: RequestHead,
    /// Request body.
    pub body: Body,
}

impl Request {
    /// Request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.head.method
    }

    /// Request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.head.path
    }

    /// Query string, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.head.query.as_deref()
    }

    /// Returns the first header named `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// Returns `true` if the connection may serve another request after
    /// this one.
    ///
    /// HTTP/1.0 closes unless `Connection: keep-alive` is sent; later
    /// versions stay open unless `Connection: close` is sent.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        if self.head.version.eq_ignore_ascii_case("HTTP/1.0") {
            self.head.connection_has("keep-alive")
        } else {
            !self.head.connection_has("close")
        }
    }

    /// Returns `true` if this is a WebSocket upgrade request.
    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        self.head
            .header("UPGRADE")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
            && self.head.header("SEC-WEBSOCKET-KEY").is_some()
    }
}
