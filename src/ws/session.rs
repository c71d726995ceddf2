//! WebSocket session state machine.
//!
//! A [`WsSession`] sits between the transport and the application for one
//! upgraded connection. Inbound bytes go through the [`FrameDecoder`];
//! control frames are answered here and only complete data messages reach
//! the application. Outbound frames are queued until the host drains them
//! with [`WsSession::take_outbound`].

use std::collections::VecDeque;

use bytes::Bytes;

use super::codec::{Identity, PayloadCodec};
use super::decoder::{FrameDecoder, WsEvent};
use super::frame::{close_frame, encode_message, ping_frame, pong_frame};
use crate::config::WsLimits;

/// Close status for a normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// A complete inbound message handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message payload after the codec.
    pub payload: Bytes,
    /// `true` for text frames.
    pub is_text: bool,
}

impl Message {
    /// Returns the payload as text, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Frames flow in both directions.
    Open,
    /// A close frame was queued; the host closes after flushing.
    Closing,
}

/// Per-connection WebSocket session.
#[derive(Debug)]
pub struct WsSession {
    decoder: FrameDecoder,
    codec: Box<dyn PayloadCodec>,
    outbound: VecDeque<Bytes>,
    urgent: usize,
    state: SessionState,
}

impl WsSession {
    /// Creates a server-side session (client frames must be masked).
    #[must_use]
    pub fn new(limits: &WsLimits) -> Self {
        Self {
            decoder: FrameDecoder::new(true, limits.max_message_size),
            codec: Box::new(Identity),
            outbound: VecDeque::new(),
            urgent: 0,
            state: SessionState::Open,
        }
    }

    /// Installs a negotiated payload codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Box<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns `true` once the session is shutting down.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state == SessionState::Closing
    }

    /// Decodes inbound bytes, answering control frames and returning the
    /// complete data messages in arrival order.
    ///
    /// Events decoded after the session starts closing are dropped.
    pub fn receive(&mut self, data: &[u8]) -> Vec<Message> {
        let mut messages = Vec::new();
        for event in self.decoder.decode(data) {
            if self.is_closing() {
                break;
            }
            match event {
                WsEvent::Message { payload, is_text } => match self.codec.decode(payload) {
                    Ok(payload) => messages.push(Message { payload, is_text }),
                    Err(e) => {
                        tracing::debug!(error = %e, "inbound payload rejected by codec");
                        self.close(Some(1007));
                    }
                },
                WsEvent::Ping(payload) => self.push_urgent(pong_frame(&payload)),
                WsEvent::Pong(_) => {}
                WsEvent::Close(code) => {
                    tracing::debug!(?code, "peer closed websocket");
                    self.close(None);
                }
                WsEvent::ProtocolError(violation) => {
                    self.close(Some(violation.close_code()));
                }
            }
        }
        messages
    }

    /// Queues a complete message. Returns `false` if the session is closing
    /// or the codec refused the payload.
    pub fn send(&mut self, payload: &[u8], is_text: bool) -> bool {
        self.send_fragment(payload, is_text, true, true)
    }

    /// Queues one piece of a streamed message.
    pub fn send_fragment(&mut self, payload: &[u8], is_text: bool, is_first: bool, is_last: bool) -> bool {
        if self.is_closing() {
            return false;
        }
        let encoded = match self.codec.encode(payload) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "outbound payload rejected by codec");
                return false;
            }
        };
        self.outbound
            .push_back(Bytes::from(encode_message(&encoded, is_text, is_first, is_last)));
        true
    }

    /// Queues a server-initiated ping.
    pub fn ping(&mut self, payload: &[u8]) {
        if !self.is_closing() {
            self.outbound.push_back(Bytes::from(ping_frame(payload)));
        }
    }

    /// Queues a close frame and moves to [`SessionState::Closing`].
    ///
    /// Only the first call queues a frame.
    pub fn close(&mut self, code: Option<u16>) {
        if self.is_closing() {
            return;
        }
        self.outbound.push_back(Bytes::from(close_frame(code)));
        self.state = SessionState::Closing;
    }

    /// Returns `true` if frames are waiting to be written.
    #[must_use]
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Drains queued frames in write order.
    pub fn take_outbound(&mut self) -> Vec<Bytes> {
        self.urgent = 0;
        self.outbound.drain(..).collect()
    }

    /// Places a frame ahead of everything not yet written, after earlier
    /// urgent frames.
    fn push_urgent(&mut self, frame: Vec<u8>) {
        let at = self.urgent.min(self.outbound.len());
        self.outbound.insert(at, Bytes::from(frame));
        self.urgent += 1;
    }
}
