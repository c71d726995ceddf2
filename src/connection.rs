//! Per-connection protocol dispatch.
//!
//! A [`Connection`] starts in HTTP mode. Each complete request goes to the
//! application's [`Handler`]; a [`Reply::Upgrade`] on a valid upgrade
//! request switches the connection to WebSocket mode, carrying over any
//! bytes that arrived after the request head. Rejects write the canned
//! response and close.
//!
//! A connection is owned by exactly one task in the host, so none of its
//! state is shared or locked.

use std::fmt;
use std::sync::Arc;

use crate::config::WsLimits;
use crate::error::RESPONSE_400;
use crate::http::{Feed, HttpParser, Request, Response};
use crate::pubsub::{Publication, Subscriber, SubscriberId};
use crate::transport::{ReadOutcome, Transport};
use crate::ws::handshake::upgrade_response;
use crate::ws::{HandshakeError, Message, WsSession};

const READ_CHUNK: usize = 16 * 1024;

/// What the application wants done with a request.
#[derive(Debug)]
pub enum Reply {
    /// Write this response.
    Response(Response),
    /// Switch to WebSocket. Answered with 400 if the request is not a valid
    /// upgrade.
    Upgrade,
}

/// Application callbacks.
///
/// One handler is shared by every connection; per-connection state lives
/// in the hub (keyed by [`SubscriberId`]) or in the application itself.
pub trait Handler: Send + Sync + fmt::Debug {
    /// Handles a complete HTTP request.
    fn on_request(&self, request: Request) -> Reply;

    /// The connection just switched to WebSocket.
    fn on_open(&self, _ws: &mut WsContext<'_>) {}

    /// A complete WebSocket message arrived.
    fn on_message(&self, ws: &mut WsContext<'_>, message: Message);

    /// A publication arrived for this connection. Sends the payload as a
    /// text message by default.
    fn on_publication(&self, ws: &mut WsContext<'_>, publication: &Publication) {
        ws.send(&publication.payload, true);
    }

    /// The connection closed. Called once.
    fn on_close(&self, _id: SubscriberId) {}
}

/// WebSocket side of a connection, as seen by a [`Handler`].
#[derive(Debug)]
pub struct WsContext<'a> {
    id: SubscriberId,
    subscriber: &'a Arc<dyn Subscriber>,
    session: &'a mut WsSession,
}

impl WsContext<'_> {
    /// Connection identity.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Handle to pass to [`crate::pubsub::Hub::subscribe`].
    #[must_use]
    pub fn subscriber(&self) -> Arc<dyn Subscriber> {
        Arc::clone(self.subscriber)
    }

    /// Queues a message. Returns `false` if the session is closing.
    pub fn send(&mut self, payload: &[u8], is_text: bool) -> bool {
        self.session.send(payload, is_text)
    }

    /// Starts the close handshake.
    pub fn close(&mut self, code: Option<u16>) {
        self.session.close(code);
    }
}

#[derive(Debug)]
enum Protocol {
    Http(HttpParser),
    WebSocket(WsSession),
    Closed,
}

/// One client connection.
#[derive(Debug)]
pub struct Connection {
    id: SubscriberId,
    subscriber: Arc<dyn Subscriber>,
    handler: Arc<dyn Handler>,
    ws_limits: WsLimits,
    protocol: Protocol,
}

impl Connection {
    /// Creates a connection in HTTP mode. Its id is the subscriber's id.
    #[must_use]
    pub fn new(
        parser: HttpParser,
        ws_limits: WsLimits,
        handler: Arc<dyn Handler>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Self {
        Self {
            id: subscriber.id(),
            subscriber,
            handler,
            ws_limits,
            protocol: Protocol::Http(parser),
        }
    }

    /// Connection identity.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Returns `true` after a successful upgrade, until close.
    #[must_use]
    pub const fn is_websocket(&self) -> bool {
        matches!(self.protocol, Protocol::WebSocket(_))
    }

    /// Returns `true` once the connection is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.protocol, Protocol::Closed)
    }

    /// Reads until the transport would block, processing everything read.
    pub fn on_readable(&mut self, transport: &mut dyn Transport) {
        let mut buf = vec![0u8; READ_CHUNK];
        while !self.is_closed() {
            match transport.read(&mut buf) {
                ReadOutcome::Data(0) | ReadOutcome::Eof => self.shutdown(transport),
                ReadOutcome::Data(n) => {
                    let chunk = buf.get(..n).unwrap_or_default();
                    self.receive(chunk, transport);
                }
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Error(e) => {
                    tracing::debug!(conn = %self.id, error = %e, "read failed");
                    self.shutdown(transport);
                }
            }
        }
    }

    /// Processes bytes already read from the peer.
    pub fn receive(&mut self, data: &[u8], transport: &mut dyn Transport) {
        match self.protocol {
            Protocol::Http(_) => self.receive_http(data, transport),
            Protocol::WebSocket(_) => self.receive_ws(data, transport),
            Protocol::Closed => {}
        }
    }

    /// Hands a publication to the handler. Ignored unless upgraded.
    pub fn deliver(&mut self, publication: &Publication, transport: &mut dyn Transport) {
        let Protocol::WebSocket(session) = &mut self.protocol else {
            return;
        };
        let mut ctx = WsContext {
            id: self.id,
            subscriber: &self.subscriber,
            session,
        };
        self.handler.on_publication(&mut ctx, publication);
        self.flush_ws(transport);
    }

    /// Sends a keep-alive ping. Ignored unless upgraded.
    pub fn ping(&mut self, transport: &mut dyn Transport) {
        if let Protocol::WebSocket(session) = &mut self.protocol {
            session.ping(&[]);
            self.flush_ws(transport);
        }
    }

    /// Closes the connection. A WebSocket connection sends a close frame
    /// with `code` first.
    pub fn close(&mut self, code: Option<u16>, transport: &mut dyn Transport) {
        if let Protocol::WebSocket(session) = &mut self.protocol {
            session.close(code);
            self.flush_ws(transport);
        }
        self.shutdown(transport);
    }

    fn receive_http(&mut self, data: &[u8], transport: &mut dyn Transport) {
        let Protocol::Http(parser) = &mut self.protocol else {
            return;
        };
        let mut feed = parser.feed(data);
        loop {
            match feed {
                Feed::Incomplete => return,
                Feed::Reject(reject) => {
                    tracing::debug!(conn = %self.id, status = reject.status_code(), "rejecting request");
                    if self.write(transport, reject.canned_response()) {
                        self.shutdown(transport);
                    }
                    return;
                }
                Feed::Ready(request) => {
                    if !self.dispatch(request, transport) {
                        return;
                    }
                }
            }
            let Protocol::Http(parser) = &mut self.protocol else {
                return;
            };
            feed = parser.poll();
        }
    }

    /// Returns `true` if the connection stays in HTTP mode.
    fn dispatch(&mut self, request: Request, transport: &mut dyn Transport) -> bool {
        let keep_alive = request.keep_alive();
        let handshake = if request.is_websocket_upgrade() {
            upgrade_response(&request)
        } else {
            Err(HandshakeError::NotUpgrade)
        };
        tracing::trace!(conn = %self.id, method = request.method(), path = request.path(), "request");

        match self.handler.on_request(request) {
            Reply::Response(response) => {
                if !self.write(transport, &response.to_bytes(keep_alive)) {
                    return false;
                }
                if !keep_alive {
                    self.shutdown(transport);
                    return false;
                }
                true
            }
            Reply::Upgrade => {
                match handshake {
                    Ok(accept) => self.upgrade(&accept, transport),
                    Err(e) => {
                        tracing::debug!(conn = %self.id, error = %e, "upgrade refused");
                        if self.write(transport, RESPONSE_400) {
                            self.shutdown(transport);
                        }
                    }
                }
                false
            }
        }
    }

    fn upgrade(&mut self, accept: &[u8], transport: &mut dyn Transport) {
        if !self.write(transport, accept) {
            return;
        }
        let Protocol::Http(parser) = std::mem::replace(&mut self.protocol, Protocol::Closed) else {
            return;
        };
        let remaining = parser.into_remaining();

        let mut session = WsSession::new(&self.ws_limits);
        let mut ctx = WsContext {
            id: self.id,
            subscriber: &self.subscriber,
            session: &mut session,
        };
        self.handler.on_open(&mut ctx);
        self.protocol = Protocol::WebSocket(session);
        tracing::debug!(conn = %self.id, carried = remaining.len(), "upgraded to websocket");

        if remaining.is_empty() {
            self.flush_ws(transport);
        } else {
            self.receive_ws(&remaining, transport);
        }
    }

    fn receive_ws(&mut self, data: &[u8], transport: &mut dyn Transport) {
        let Protocol::WebSocket(session) = &mut self.protocol else {
            return;
        };
        for message in session.receive(data) {
            let mut ctx = WsContext {
                id: self.id,
                subscriber: &self.subscriber,
                session: &mut *session,
            };
            self.handler.on_message(&mut ctx, message);
        }
        self.flush_ws(transport);
    }

    fn flush_ws(&mut self, transport: &mut dyn Transport) {
        let Protocol::WebSocket(session) = &mut self.protocol else {
            return;
        };
        let frames = session.take_outbound();
        let closing = session.is_closing();
        for frame in &frames {
            if !self.write(transport, frame) {
                return;
            }
        }
        if closing {
            self.shutdown(transport);
        }
    }

    /// Writes `data`, shutting down on failure. Returns `false` on failure.
    fn write(&mut self, transport: &mut dyn Transport, data: &[u8]) -> bool {
        match transport.write(data) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(conn = %self.id, error = %e, "write failed");
                self.shutdown(transport);
                false
            }
        }
    }

    fn shutdown(&mut self, transport: &mut dyn Transport) {
        if self.is_closed() {
            return;
        }
        self.protocol = Protocol::Closed;
        transport.close();
        self.handler.on_close(self.id);
        tracing::trace!(conn = %self.id, "connection closed");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::config::HttpLimits;
    use crate::error::RESPONSE_413;
    use crate::pubsub::MailboxSubscriber;
    use crate::transport::MemoryTransport;
    use crate::ws::frame::{Opcode, encode_frame};
    use crate::ws::{FrameDecoder, WsEvent};

    const UPGRADE: &[u8] = b"GET /ws HTTP/1.1\r\nHost: test\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

    #[derive(Debug, Default)]
    struct Echo {
        opened: Mutex<usize>,
        closed: Mutex<Vec<SubscriberId>>,
    }

    impl Handler for Echo {
        fn on_request(&self, request: Request) -> Reply {
            if request.path() == "/ws" {
                Reply::Upgrade
            } else {
                Reply::Response(Response::text(200, format!("path={}", request.path())))
            }
        }

        fn on_open(&self, _ws: &mut WsContext<'_>) {
            *self.opened.lock() += 1;
        }

        fn on_message(&self, ws: &mut WsContext<'_>, message: Message) {
            ws.send(&message.payload, message.is_text);
        }

        fn on_close(&self, id: SubscriberId) {
            self.closed.lock().push(id);
        }
    }

    fn connection(handler: &Arc<Echo>, limits: HttpLimits) -> Connection {
        let (mailbox, _rx) = MailboxSubscriber::channel(SubscriberId::new());
        Connection::new(
            HttpParser::in_memory(limits),
            WsLimits::default(),
            Arc::clone(handler) as Arc<dyn Handler>,
            Arc::new(mailbox),
        )
    }

    fn client_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        encode_frame(true, opcode, payload, Some([1, 2, 3, 4]))
    }

    /// Splits a 101 response from the frames that follow it.
    fn after_head(written: &[u8]) -> (String, Vec<WsEvent>) {
        let Some(end) = written.windows(4).position(|w| w == b"\r\n\r\n") else {
            panic!("no response head in output");
        };
        let (head, rest) = written.split_at(end + 4);
        let mut decoder = FrameDecoder::new(false, usize::MAX);
        (String::from_utf8_lossy(head).into_owned(), decoder.decode(rest))
    }

    #[test]
    fn serves_pipelined_requests() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();
        t.push_inbound(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());

        conn.on_readable(&mut t);

        let out = String::from_utf8_lossy(&t.written).into_owned();
        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(out.contains("path=/a"));
        assert!(out.ends_with("path=/b"));
        assert!(!conn.is_closed());
    }

    #[test]
    fn connection_close_request_closes_after_response() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();
        t.push_inbound(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".to_vec());

        conn.on_readable(&mut t);

        assert!(conn.is_closed());
        assert!(t.is_closed());
        assert_eq!(handler.closed.lock().as_slice(), &[conn.id()]);
    }

    #[test]
    fn missing_host_gets_canned_400() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();
        t.push_inbound(b"GET / HTTP/1.1\r\n\r\n".to_vec());

        conn.on_readable(&mut t);

        assert_eq!(t.written, RESPONSE_400);
        assert!(t.is_closed());
    }

    #[test]
    fn oversized_head_gets_canned_413() {
        let handler = Arc::new(Echo::default());
        let limits = HttpLimits {
            max_head_size: 64,
            ..HttpLimits::default()
        };
        let mut conn = connection(&handler, limits);
        let mut t = MemoryTransport::new();
        let mut raw = b"GET / HTTP/1.1\r\nHost: x\r\nX-Pad: ".to_vec();
        raw.extend(std::iter::repeat_n(b'a', 100));
        t.push_inbound(raw);

        conn.on_readable(&mut t);

        assert_eq!(t.written, RESPONSE_413);
        assert!(conn.is_closed());
    }

    #[test]
    fn upgrade_then_echo() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();
        t.push_inbound(UPGRADE.to_vec());
        conn.on_readable(&mut t);
        assert!(conn.is_websocket());
        assert_eq!(*handler.opened.lock(), 1);

        t.push_inbound(client_frame(Opcode::Text, b"hello"));
        conn.on_readable(&mut t);

        let (head, events) = after_head(&t.written);
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert_eq!(
            events,
            vec![WsEvent::Message {
                payload: Bytes::from_static(b"hello"),
                is_text: true,
            }]
        );
    }

    #[test]
    fn frames_in_the_upgrade_packet_are_not_lost() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();
        let mut packet = UPGRADE.to_vec();
        packet.extend(client_frame(Opcode::Ping, b"p"));
        packet.extend(client_frame(Opcode::Binary, &[7, 7]));
        t.push_inbound(packet);

        conn.on_readable(&mut t);

        let (_, events) = after_head(&t.written);
        assert_eq!(
            events,
            vec![
                WsEvent::Pong(Bytes::from_static(b"p")),
                WsEvent::Message {
                    payload: Bytes::from_static(&[7, 7]),
                    is_text: false,
                },
            ]
        );
    }

    #[test]
    fn peer_close_is_echoed_and_connection_closes() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();
        t.push_inbound(UPGRADE.to_vec());
        t.push_inbound(client_frame(Opcode::Close, &[]));

        conn.on_readable(&mut t);

        let (_, events) = after_head(&t.written);
        assert_eq!(events, vec![WsEvent::Close(None)]);
        assert!(conn.is_closed());
        assert!(t.is_closed());
        assert_eq!(handler.closed.lock().len(), 1);
    }

    #[test]
    fn publications_and_pings_reach_websocket_peer() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();

        conn.deliver(&Publication::new("c", "ignored"), &mut t);
        assert!(t.written.is_empty());

        t.push_inbound(UPGRADE.to_vec());
        conn.on_readable(&mut t);
        conn.deliver(&Publication::new("c", "news"), &mut t);
        conn.ping(&mut t);
        conn.close(Some(1001), &mut t);
        conn.close(None, &mut t);

        let (_, events) = after_head(&t.written);
        assert_eq!(
            events,
            vec![
                WsEvent::Message {
                    payload: Bytes::from_static(b"news"),
                    is_text: true,
                },
                WsEvent::Ping(Bytes::new()),
                WsEvent::Close(Some(1001)),
            ]
        );
        assert_eq!(handler.closed.lock().len(), 1);
    }

    #[test]
    fn upgrade_reply_to_plain_request_is_400() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();
        t.push_inbound(b"GET /ws HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());

        conn.on_readable(&mut t);

        assert_eq!(t.written, RESPONSE_400);
        assert!(conn.is_closed());
    }

    #[test]
    fn eof_closes_once() {
        let handler = Arc::new(Echo::default());
        let mut conn = connection(&handler, HttpLimits::default());
        let mut t = MemoryTransport::new();
        t.set_eof();
        conn.on_readable(&mut t);
        conn.on_readable(&mut t);
        assert!(conn.is_closed());
        assert_eq!(handler.closed.lock().len(), 1);
    }
}
