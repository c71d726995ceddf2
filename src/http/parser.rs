//! Incremental HTTP/1.x request parser.
//!
//! [`HttpParser`] accumulates bytes for one connection and produces a
//! [`Feed`] outcome per call. Parsing runs in order: request line, header
//! lines up to the first empty line, then the body. Bodies that fit in the
//! remaining head capacity are split out of the buffer without copying;
//! larger bodies stream into an [`OverflowSink`].
//!
//! After a request completes the parser starts over on whatever bytes
//! remain, so pipelined requests are drained by calling [`HttpParser::poll`]
//! until it returns [`Feed::Incomplete`].

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use super::request::{Body, Request, RequestHead};
use super::spool::{MemorySpool, OverflowSink, SpoolFactory};
use crate::config::HttpLimits;
use crate::error::Reject;

/// Outcome of feeding bytes to the parser.
#[derive(Debug)]
pub enum Feed {
    /// More bytes are needed.
    Incomplete,
    /// A request is complete.
    Ready(Request),
    /// The request is unacceptable; write the canned response and close.
    Reject(Reject),
}

#[derive(Debug)]
enum BodyTarget {
    Buffered,
    Spooled {
        sink: Box<dyn OverflowSink>,
        received: u64,
    },
}

#[derive(Debug)]
enum State {
    Head,
    Body { head: RequestHead, target: BodyTarget },
}

/// Per-connection HTTP request parser.
#[derive(Debug)]
pub struct HttpParser {
    limits: HttpLimits,
    spool: Arc<dyn SpoolFactory>,
    buffer: BytesMut,
    state: State,
}

impl HttpParser {
    /// Creates a parser that spools oversized bodies through `spool`.
    #[must_use]
    pub fn new(limits: HttpLimits, spool: Arc<dyn SpoolFactory>) -> Self {
        Self {
            limits,
            spool,
            buffer: BytesMut::with_capacity(limits.max_head_size),
            state: State::Head,
        }
    }

    /// Creates a parser that spools oversized bodies in memory.
    #[must_use]
    pub fn in_memory(limits: HttpLimits) -> Self {
        Self::new(limits, Arc::new(MemorySpool))
    }

    /// Appends `data` and continues parsing.
    pub fn feed(&mut self, data: &[u8]) -> Feed {
        self.buffer.extend_from_slice(data);
        self.poll()
    }

    /// Continues parsing already buffered bytes.
    pub fn poll(&mut self) -> Feed {
        match std::mem::replace(&mut self.state, State::Head) {
            State::Head => self.parse_head(),
            State::Body { head, target } => self.continue_body(head, target),
        }
    }

    /// Returns `true` when no request is in flight and nothing is buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Head) && self.buffer.is_empty()
    }

    /// Number of bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Consumes the parser, returning the bytes that follow the last
    /// completed request (e.g. the first WebSocket frames after an upgrade).
    #[must_use]
    pub fn into_remaining(self) -> Bytes {
        self.buffer.freeze()
    }

    fn parse_head(&mut self) -> Feed {
        let blank = self
            .buffer
            .iter()
            .take_while(|b| matches!(**b, b'\r' | b'\n'))
            .count();
        self.buffer.advance(blank);
        if self.buffer.is_empty() {
            return Feed::Incomplete;
        }

        let window = self.buffer.len().min(self.limits.max_head_size);
        let Some(head_len) = find_head_end(self.buffer.get(..window).unwrap_or_default()) else {
            if self.buffer.len() >= self.limits.max_head_size {
                return self.reject(Reject::EntityTooLarge);
            }
            return Feed::Incomplete;
        };

        let raw = self.buffer.split_to(head_len);
        let head = match parse_head(&raw) {
            Ok(head) => head,
            Err(reject) => return self.reject(reject),
        };

        let length = head.content_length;
        if length > self.limits.max_body_size {
            return self.reject(Reject::EntityTooLarge);
        }
        if length == 0 {
            return Feed::Ready(Request {
                head,
                body: Body::Empty,
            });
        }

        let fits = (head_len as u64).saturating_add(length) <= self.limits.max_head_size as u64;
        let target = if fits {
            BodyTarget::Buffered
        } else {
            match self.spool.create(length) {
                Ok(sink) => BodyTarget::Spooled { sink, received: 0 },
                Err(e) => {
                    tracing::warn!(error = %e, length, "failed to allocate body spool");
                    return self.reject(Reject::InternalError);
                }
            }
        };
        self.continue_body(head, target)
    }

    fn continue_body(&mut self, head: RequestHead, target: BodyTarget) -> Feed {
        let length = head.content_length;
        match target {
            BodyTarget::Buffered => {
                let Ok(needed) = usize::try_from(length) else {
                    return self.reject(Reject::EntityTooLarge);
                };
                if self.buffer.len() < needed {
                    self.state = State::Body {
                        head,
                        target: BodyTarget::Buffered,
                    };
                    return Feed::Incomplete;
                }
                let body = self.buffer.split_to(needed).freeze();
                Feed::Ready(Request {
                    head,
                    body: Body::Buffered(body),
                })
            }
            BodyTarget::Spooled { mut sink, received } => {
                let remaining = length.saturating_sub(received);
                let take = usize::try_from(remaining)
                    .unwrap_or(usize::MAX)
                    .min(self.buffer.len());
                if take > 0 {
                    let chunk = self.buffer.split_to(take);
                    if let Err(e) = sink.write_all(&chunk) {
                        tracing::warn!(error = %e, "failed to write body spool");
                        return self.reject(Reject::InternalError);
                    }
                }
                let received = received.saturating_add(take as u64);
                if received < length {
                    self.state = State::Body {
                        head,
                        target: BodyTarget::Spooled { sink, received },
                    };
                    return Feed::Incomplete;
                }
                if let Err(e) = sink.rewind() {
                    tracing::warn!(error = %e, "failed to rewind body spool");
                    return self.reject(Reject::InternalError);
                }
                Feed::Ready(Request {
                    head,
                    body: Body::Spooled(sink),
                })
            }
        }
    }

    fn reject(&mut self, reject: Reject) -> Feed {
        tracing::debug!(status = reject.status_code(), "rejecting http request");
        self.buffer.clear();
        self.state = State::Head;
        Feed::Reject(reject)
    }
}

/// Returns the length of the head (terminator included), accepting both
/// `\r\n\r\n` and bare `\n\n`.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.iter().enumerate().find_map(|(i, b)| {
        if *b != b'\n' {
            return None;
        }
        match (buf.get(i + 1), buf.get(i + 2)) {
            (Some(b'\n'), _) => Some(i + 2),
            (Some(b'\r'), Some(b'\n')) => Some(i + 3),
            _ => None,
        }
    })
}

fn parse_head(raw: &[u8]) -> Result<RequestHead, Reject> {
    let text = std::str::from_utf8(raw).map_err(|_| Reject::BadRequest)?;
    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let mut head = parse_request_line(lines.next().unwrap_or_default())?;
    let mut host: Option<String> = None;
    let mut content_length: Option<u64> = None;

    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or(Reject::BadRequest)?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(Reject::BadRequest);
        }
        let name = name.to_ascii_uppercase();
        let value = value.trim_matches(|c| c == ' ' || c == '\t');

        match name.as_str() {
            "HOST" => {
                if host.is_some() {
                    return Err(Reject::BadRequest);
                }
                host = Some(value.to_string());
            }
            "CONTENT-TYPE" => head.content_type = Some(value.to_string()),
            // Only content-length framing is supported.
            "TRANSFER-ENCODING" => return Err(Reject::BadRequest),
            "CONTENT-LENGTH" => {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Reject::BadRequest);
                }
                let parsed: u64 = value.parse().map_err(|_| Reject::BadRequest)?;
                if content_length.is_some_and(|prev| prev != parsed) {
                    return Err(Reject::BadRequest);
                }
                content_length = Some(parsed);
            }
            _ => {}
        }
        head.headers.push((name, value.to_string()));
    }

    head.host = host.ok_or(Reject::BadRequest)?;
    head.content_length = content_length.unwrap_or(0);
    if head.content_type.is_some() && head.content_length == 0 {
        return Err(Reject::BadRequest);
    }
    Ok(head)
}

fn parse_request_line(line: &str) -> Result<RequestHead, Reject> {
    let mut parts = line.split(' ');
    let method = parts
        .next()
        .filter(|m| !m.is_empty() && m.bytes().all(|b| b.is_ascii_graphic()))
        .ok_or(Reject::BadRequest)?;
    let target = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or(Reject::BadRequest)?;
    let version = parts
        .next()
        .filter(|v| v.starts_with("HTTP"))
        .ok_or(Reject::BadRequest)?;
    if parts.next().is_some() {
        return Err(Reject::BadRequest);
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    if path.is_empty() {
        return Err(Reject::BadRequest);
    }

    Ok(RequestHead {
        method: method.to_string(),
        path: path.to_string(),
        query,
        version: version.to_string(),
        ..RequestHead::default()
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::io;

    use proptest::prelude::*;

    use super::*;
    use crate::error::RESPONSE_400;
    use crate::error::RESPONSE_413;
    use crate::error::RESPONSE_502;

    fn limits(max_head_size: usize, max_body_size: u64) -> HttpLimits {
        HttpLimits {
            max_head_size,
            max_body_size,
        }
    }

    fn parser() -> HttpParser {
        HttpParser::in_memory(limits(1024, 1024 * 1024))
    }

    fn expect_ready(feed: Feed) -> Request {
        match feed {
            Feed::Ready(request) => request,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    fn expect_reject(feed: Feed) -> Reject {
        match feed {
            Feed::Reject(reject) => reject,
            other => panic!("expected a reject, got {other:?}"),
        }
    }

    fn body_bytes(request: Request) -> Vec<u8> {
        let Ok(bytes) = request.body.into_bytes() else {
            panic!("body read back failed");
        };
        bytes.to_vec()
    }

    const POST: &[u8] = b"POST /submit?x=1&y=2 HTTP/1.1\r\nHost: example.com\r\nContent-Type: text/plain\r\nContent-Length: 11\r\nX-Custom: a b \r\n\r\nhello world";

    #[test]
    fn parses_request_line_and_headers() {
        let mut p = parser();
        let request = expect_ready(p.feed(POST));
        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/submit");
        assert_eq!(request.query(), Some("x=1&y=2"));
        assert_eq!(request.head.version, "HTTP/1.1");
        assert_eq!(request.head.host, "example.com");
        assert_eq!(request.head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(request.head.content_length, 11);
        let names: Vec<&str> = request.head.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["HOST", "CONTENT-TYPE", "CONTENT-LENGTH", "X-CUSTOM"]);
        assert_eq!(request.header("x-custom"), Some("a b"));
        assert!(!request.body.is_spooled());
        assert_eq!(body_bytes(request), b"hello world");
        assert!(p.is_idle());
    }

    #[test]
    fn get_without_body_completes_after_headers() {
        let mut p = parser();
        let request = expect_ready(p.feed(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n"));
        assert!(request.body.is_empty());
        assert_eq!(request.query(), None);
    }

    #[test]
    fn bare_lf_line_endings_are_accepted() {
        let mut p = parser();
        let request = expect_ready(p.feed(b"GET /lf HTTP/1.0\nHost: a\n\n"));
        assert_eq!(request.path(), "/lf");
    }

    #[test]
    fn partial_input_is_incomplete() {
        let mut p = parser();
        assert!(matches!(p.feed(b"GET / HTTP/1.1\r\nHo"), Feed::Incomplete));
        assert!(matches!(p.feed(b"st: a\r\n"), Feed::Incomplete));
        let request = expect_ready(p.feed(b"\r\n"));
        assert_eq!(request.head.host, "a");
    }

    #[test]
    fn missing_host_is_400() {
        let mut p = parser();
        let reject = expect_reject(p.feed(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n"));
        assert_eq!(reject, Reject::BadRequest);
        assert_eq!(reject.canned_response(), RESPONSE_400);
    }

    #[test]
    fn malformed_request_lines_are_400() {
        for raw in [
            &b"GET /\r\nHost: a\r\n\r\n"[..],
            b"GET / FTP/1.0\r\nHost: a\r\n\r\n",
            b"GET  / HTTP/1.1\r\nHost: a\r\n\r\n",
            b"GET / HTTP/1.1 extra\r\nHost: a\r\n\r\n",
            b"GET ?q HTTP/1.1\r\nHost: a\r\n\r\n",
        ] {
            let mut p = parser();
            assert_eq!(expect_reject(p.feed(raw)), Reject::BadRequest);
        }
    }

    #[test]
    fn malformed_headers_are_400() {
        for raw in [
            &b"GET / HTTP/1.1\r\nHost a\r\n\r\n"[..],
            b"GET / HTTP/1.1\r\nHost: a\r\n: empty\r\n\r\n",
            b"GET / HTTP/1.1\r\nHost: a\r\nBad Name: x\r\n\r\n",
            b"GET / HTTP/1.1\r\nHost: a\r\nContent-Length: ten\r\n\r\n",
            b"GET / HTTP/1.1\r\nHost: a\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\nab",
            b"GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n",
        ] {
            let mut p = parser();
            assert_eq!(expect_reject(p.feed(raw)), Reject::BadRequest);
        }
    }

    #[test]
    fn content_type_without_length_is_400() {
        let mut p = parser();
        let raw = b"POST / HTTP/1.1\r\nHost: a\r\nContent-Type: text/plain\r\n\r\n";
        assert_eq!(expect_reject(p.feed(raw)), Reject::BadRequest);
    }

    #[test]
    fn oversized_head_is_413() {
        let mut p = HttpParser::in_memory(limits(64, 1024));
        let mut raw = b"GET / HTTP/1.1\r\nHost: a\r\nX-Pad: ".to_vec();
        raw.extend(std::iter::repeat_n(b'x', 100));
        let reject = expect_reject(p.feed(&raw));
        assert_eq!(reject, Reject::EntityTooLarge);
        assert_eq!(reject.canned_response(), RESPONSE_413);
    }

    #[test]
    fn head_filling_buffer_across_feeds_is_413() {
        let mut p = HttpParser::in_memory(limits(64, 1024));
        assert!(matches!(p.feed(b"GET / HTTP/1.1\r\nHost: a\r\n"), Feed::Incomplete));
        let mut outcome = Feed::Incomplete;
        for _ in 0..64 {
            outcome = p.feed(b"X-Pad: y\r\n");
            if !matches!(outcome, Feed::Incomplete) {
                break;
            }
        }
        assert_eq!(expect_reject(outcome), Reject::EntityTooLarge);
    }

    #[test]
    fn body_over_ceiling_is_413_before_spooling() {
        let mut p = HttpParser::in_memory(limits(1024, 10));
        let raw = b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 11\r\n\r\n";
        assert_eq!(expect_reject(p.feed(raw)), Reject::EntityTooLarge);
    }

    #[test]
    fn large_body_is_spooled_across_feeds() {
        let mut p = HttpParser::in_memory(limits(128, 1024 * 1024));
        let body: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let head = format!("PUT /upload HTTP/1.1\r\nHost: a\r\nContent-Length: {}\r\n\r\n", body.len());
        assert!(matches!(p.feed(head.as_bytes()), Feed::Incomplete));
        let mut outcome = Feed::Incomplete;
        for chunk in body.chunks(97) {
            outcome = p.feed(chunk);
        }
        let request = expect_ready(outcome);
        assert!(request.body.is_spooled());
        assert_eq!(request.body.len(), 1000);
        assert_eq!(body_bytes(request), body);
    }

    #[test]
    fn pipelined_requests_are_drained_with_poll() {
        let mut p = parser();
        let raw = b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nPOST /two HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\n\r\nabcGET /three HTTP/1.1\r\nHost: a\r\n\r\n";
        let first = expect_ready(p.feed(raw));
        assert_eq!(first.path(), "/one");
        let second = expect_ready(p.poll());
        assert_eq!(second.path(), "/two");
        assert_eq!(body_bytes(second), b"abc");
        let third = expect_ready(p.poll());
        assert_eq!(third.path(), "/three");
        assert!(matches!(p.poll(), Feed::Incomplete));
        assert!(p.is_idle());
    }

    #[test]
    fn spooled_request_leaves_pipelined_bytes() {
        let mut p = HttpParser::in_memory(limits(64, 1024));
        let mut raw = b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 100\r\n\r\n".to_vec();
        raw.extend(std::iter::repeat_n(b'z', 100));
        raw.extend_from_slice(b"GET /next HTTP/1.1\r\nHost: a\r\n\r\n");
        let first = expect_ready(p.feed(&raw));
        assert!(first.body.is_spooled());
        let second = expect_ready(p.poll());
        assert_eq!(second.path(), "/next");
    }

    #[test]
    fn leading_blank_lines_are_skipped() {
        let mut p = parser();
        let request = expect_ready(p.feed(b"\r\n\r\nGET /x HTTP/1.1\r\nHost: a\r\n\r\n"));
        assert_eq!(request.path(), "/x");
    }

    #[test]
    fn remaining_bytes_survive_for_upgrade() {
        let mut p = parser();
        let _ = expect_ready(p.feed(b"GET /ws HTTP/1.1\r\nHost: a\r\n\r\n\x81\x80"));
        assert_eq!(p.into_remaining().as_ref(), b"\x81\x80");
    }

    #[derive(Debug)]
    struct FailingSpool;

    impl SpoolFactory for FailingSpool {
        fn create(&self, _expected_len: u64) -> io::Result<Box<dyn OverflowSink>> {
            Err(io::Error::other("disk full"))
        }
    }

    #[test]
    fn spool_failure_is_502() {
        let mut p = HttpParser::new(limits(64, 1024), Arc::new(FailingSpool));
        let raw = b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 500\r\n\r\n";
        let reject = expect_reject(p.feed(raw));
        assert_eq!(reject, Reject::InternalError);
        assert_eq!(reject.status_code(), 502);
    }

    #[derive(Debug)]
    struct BrokenSink;

    impl OverflowSink for BrokenSink {
        fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
            Err(io::Error::other("device gone"))
        }

        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn rewind(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn len(&self) -> u64 {
            0
        }
    }

    #[derive(Debug)]
    struct BrokenSinkSpool;

    impl SpoolFactory for BrokenSinkSpool {
        fn create(&self, _expected_len: u64) -> io::Result<Box<dyn OverflowSink>> {
            Ok(Box::new(BrokenSink))
        }
    }

    #[test]
    fn spool_write_failure_is_502() {
        let mut p = HttpParser::new(limits(64, 1024), Arc::new(BrokenSinkSpool));
        let head = b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 500\r\n\r\n";
        assert!(matches!(p.feed(head), Feed::Incomplete));
        let reject = expect_reject(p.feed(&[b'z'; 200]));
        assert_eq!(reject, Reject::InternalError);
        assert_eq!(reject.canned_response(), RESPONSE_502);
        assert!(p.is_idle());
    }

    #[test]
    fn transfer_encoding_is_400() {
        let mut p = parser();
        let raw = b"POST /publish HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        assert_eq!(expect_reject(p.feed(raw)), Reject::BadRequest);
        assert!(p.is_idle());
    }

    fn feed_in_chunks(raw: &[u8], cuts: &[usize], head_limit: usize) -> Request {
        let mut p = HttpParser::in_memory(limits(head_limit, 1024 * 1024));
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (raw.len() + 1)).collect();
        points.sort_unstable();
        points.dedup();
        let mut start = 0;
        let mut last = Feed::Incomplete;
        for point in points.into_iter().chain(std::iter::once(raw.len())) {
            if point <= start {
                continue;
            }
            last = p.feed(&raw[start..point]);
            start = point;
            if let Feed::Ready(_) = last {
                assert_eq!(start, raw.len(), "request completed before all bytes arrived");
            }
        }
        expect_ready(last)
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_the_request(
            cuts in proptest::collection::vec(0usize..400, 0..12),
            body in proptest::collection::vec(any::<u8>(), 1..200),
            head_limit in prop_oneof![Just(160usize), Just(1024usize)],
        ) {
            let mut raw = format!(
                "POST /p?q=1 HTTP/1.1\r\nHost: h\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
                body.len()
            )
            .into_bytes();
            raw.extend_from_slice(&body);

            let whole = {
                let mut p = HttpParser::in_memory(limits(1024, 1024 * 1024));
                expect_ready(p.feed(&raw))
            };
            let chunked = feed_in_chunks(&raw, &cuts, head_limit);

            prop_assert_eq!(&whole.head, &chunked.head);
            prop_assert_eq!(body_bytes(whole), body.clone());
            prop_assert_eq!(body_bytes(chunked), body);
        }
    }
}
