//! Incremental RFC6455 frame decoder.
//!
//! [`FrameDecoder`] is a byte-driven state machine that survives arbitrary
//! read boundaries. Header bytes are consumed one at a time; payload bytes
//! are unmasked on the fly and appended either to the logical message being
//! assembled or to a separate control-frame buffer, so control frames can
//! interleave with a fragmented message.

use bytes::{Bytes, BytesMut};

use super::frame::{MAX_CONTROL_PAYLOAD, Opcode, apply_mask};

/// Event produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// A complete logical message.
    Message {
        /// Unmasked, reassembled payload.
        payload: Bytes,
        /// `true` for text (validated UTF-8), `false` for binary.
        is_text: bool,
    },
    /// Ping with its payload.
    Ping(Bytes),
    /// Pong with its payload.
    Pong(Bytes),
    /// Close frame with its optional status code.
    Close(Option<u16>),
    /// The peer violated the protocol; the connection must be closed.
    ProtocolError(ProtocolViolation),
}

/// Reason for a [`WsEvent::ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// A frame arrived unmasked where masking is required.
    #[error("unmasked frame from client")]
    UnmaskedFrame,

    /// A frame or assembled message exceeds the configured maximum.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Offending size in bytes.
        size: u64,
        /// Configured maximum.
        limit: usize,
    },

    /// A control frame had `fin=0`.
    #[error("fragmented control frame")]
    FragmentedControl,

    /// A control frame carried more than 125 bytes.
    #[error("control frame payload over 125 bytes")]
    ControlTooLarge,

    /// A continuation frame arrived with no message in progress.
    #[error("continuation without a message in progress")]
    UnexpectedContinuation,

    /// A new text/binary frame arrived before the previous message finished.
    #[error("new data frame while a fragmented message is in progress")]
    InterleavedData,

    /// A text message was not valid UTF-8.
    #[error("text message is not valid utf-8")]
    InvalidUtf8,
}

impl ProtocolViolation {
    /// Close status code matching this violation.
    #[must_use]
    pub const fn close_code(&self) -> u16 {
        match self {
            Self::MessageTooLarge { .. } => 1009,
            Self::InvalidUtf8 => 1007,
            _ => 1002,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Header1,
    Header2,
    ExtendedLength { remaining: u8, acc: u64 },
    Mask { read: usize },
    Payload { remaining: u64 },
    Closed,
}

/// Per-connection WebSocket frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    require_mask: bool,
    max_message_size: usize,
    step: Step,

    fin: bool,
    opcode: Opcode,
    masked: bool,
    mask: [u8; 4],
    length: u64,
    position: usize,

    control: BytesMut,
    message: BytesMut,
    message_opcode: Option<Opcode>,
}

impl FrameDecoder {
    /// Creates a decoder.
    ///
    /// Servers pass `require_mask = true`: every client frame must be masked.
    #[must_use]
    pub fn new(require_mask: bool, max_message_size: usize) -> Self {
        Self {
            require_mask,
            max_message_size,
            step: Step::Header1,
            fin: false,
            opcode: Opcode::Continuation,
            masked: false,
            mask: [0; 4],
            length: 0,
            position: 0,
            control: BytesMut::new(),
            message: BytesMut::new(),
            message_opcode: None,
        }
    }

    /// Returns `true` once a close frame or protocol error was decoded.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.step == Step::Closed
    }

    /// Returns `true` while a fragmented message is being assembled.
    #[must_use]
    pub fn in_message(&self) -> bool {
        self.message_opcode.is_some()
    }

    /// Decodes `data`, returning every event it completes.
    ///
    /// Input after a close or protocol error is ignored.
    pub fn decode(&mut self, data: &[u8]) -> Vec<WsEvent> {
        let mut events = Vec::new();
        let mut input = data;

        while !input.is_empty() {
            match self.step {
                Step::Closed => break,
                Step::Payload { remaining } => {
                    let take = usize::try_from(remaining)
                        .unwrap_or(usize::MAX)
                        .min(input.len());
                    let (chunk, rest) = input.split_at(take);
                    self.absorb(chunk);
                    input = rest;
                    let remaining = remaining.saturating_sub(take as u64);
                    if remaining == 0 {
                        self.finish_frame(&mut events);
                    } else {
                        self.step = Step::Payload { remaining };
                    }
                }
                _ => {
                    let Some((byte, rest)) = input.split_first() else {
                        break;
                    };
                    input = rest;
                    self.header_byte(*byte, &mut events);
                }
            }
        }
        events
    }

    fn header_byte(&mut self, byte: u8, events: &mut Vec<WsEvent>) {
        match self.step {
            Step::Header1 => {
                self.fin = byte & 0x80 != 0;
                self.opcode = Opcode::from_bits(byte);
                self.step = Step::Header2;
            }
            Step::Header2 => {
                self.masked = byte & 0x80 != 0;
                let base = byte & 0x7F;
                if self.require_mask && !self.masked {
                    return self.fail(ProtocolViolation::UnmaskedFrame, events);
                }
                if self.opcode.is_control() {
                    if !self.fin {
                        return self.fail(ProtocolViolation::FragmentedControl, events);
                    }
                    if usize::from(base) > MAX_CONTROL_PAYLOAD {
                        return self.fail(ProtocolViolation::ControlTooLarge, events);
                    }
                }
                match base {
                    126 => self.step = Step::ExtendedLength { remaining: 2, acc: 0 },
                    127 => self.step = Step::ExtendedLength { remaining: 8, acc: 0 },
                    len => self.length_known(u64::from(len), events),
                }
            }
            Step::ExtendedLength { remaining, acc } => {
                let acc = (acc << 8) | u64::from(byte);
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    self.length_known(acc, events);
                } else {
                    self.step = Step::ExtendedLength { remaining, acc };
                }
            }
            Step::Mask { read } => {
                if let Some(slot) = self.mask.get_mut(read) {
                    *slot = byte;
                }
                if read + 1 == self.mask.len() {
                    self.begin_payload(events);
                } else {
                    self.step = Step::Mask { read: read + 1 };
                }
            }
            Step::Payload { .. } | Step::Closed => {}
        }
    }

    fn length_known(&mut self, length: u64, events: &mut Vec<WsEvent>) {
        self.length = length;
        let limit = self.max_message_size;

        if length > limit as u64 {
            return self.fail(ProtocolViolation::MessageTooLarge { size: length, limit }, events);
        }

        match self.opcode {
            Opcode::Continuation => {
                if self.message_opcode.is_none() {
                    return self.fail(ProtocolViolation::UnexpectedContinuation, events);
                }
                let size = (self.message.len() as u64).saturating_add(length);
                if size > limit as u64 {
                    return self.fail(ProtocolViolation::MessageTooLarge { size, limit }, events);
                }
            }
            Opcode::Text | Opcode::Binary => {
                if self.message_opcode.is_some() {
                    return self.fail(ProtocolViolation::InterleavedData, events);
                }
            }
            _ => {}
        }

        if self.masked {
            self.step = Step::Mask { read: 0 };
        } else {
            self.begin_payload(events);
        }
    }

    fn begin_payload(&mut self, events: &mut Vec<WsEvent>) {
        self.position = 0;
        if matches!(self.opcode, Opcode::Text | Opcode::Binary) {
            self.message_opcode = Some(self.opcode);
        }
        if self.length == 0 {
            self.finish_frame(events);
        } else {
            self.step = Step::Payload {
                remaining: self.length,
            };
        }
    }

    fn absorb(&mut self, chunk: &[u8]) {
        let target = match self.opcode {
            Opcode::Text | Opcode::Binary | Opcode::Continuation => &mut self.message,
            Opcode::Close | Opcode::Ping | Opcode::Pong => &mut self.control,
            Opcode::Reserved(_) => {
                self.position += chunk.len();
                return;
            }
        };
        let start = target.len();
        target.extend_from_slice(chunk);
        if self.masked
            && let Some(fresh) = target.get_mut(start..)
        {
            apply_mask(fresh, self.mask, self.position);
        }
        self.position += chunk.len();
    }

    fn finish_frame(&mut self, events: &mut Vec<WsEvent>) {
        self.step = Step::Header1;
        match self.opcode {
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                if !self.fin {
                    return;
                }
                let is_text = self.message_opcode == Some(Opcode::Text);
                self.message_opcode = None;
                let payload = self.message.split().freeze();
                if is_text && std::str::from_utf8(&payload).is_err() {
                    return self.fail(ProtocolViolation::InvalidUtf8, events);
                }
                events.push(WsEvent::Message { payload, is_text });
            }
            Opcode::Ping => events.push(WsEvent::Ping(self.control.split().freeze())),
            Opcode::Pong => events.push(WsEvent::Pong(self.control.split().freeze())),
            Opcode::Close => {
                let body = self.control.split();
                let code = match (body.first(), body.get(1)) {
                    (Some(hi), Some(lo)) => Some(u16::from_be_bytes([*hi, *lo])),
                    _ => None,
                };
                events.push(WsEvent::Close(code));
                self.shut();
            }
            Opcode::Reserved(bits) => {
                tracing::debug!(opcode = bits, "dropping frame with reserved opcode");
                self.message.clear();
                self.message_opcode = None;
            }
        }
    }

    fn fail(&mut self, violation: ProtocolViolation, events: &mut Vec<WsEvent>) {
        tracing::debug!(%violation, "websocket protocol violation");
        events.push(WsEvent::ProtocolError(violation));
        self.shut();
    }

    fn shut(&mut self) {
        self.step = Step::Closed;
        self.message = BytesMut::new();
        self.control = BytesMut::new();
        self.message_opcode = None;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::ws::frame::{encode_frame, encode_message};

    const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    fn server_decoder() -> FrameDecoder {
        FrameDecoder::new(true, 1 << 20)
    }

    fn masked(fin: bool, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        encode_frame(fin, opcode, payload, Some(MASK))
    }

    fn single(events: Vec<WsEvent>) -> WsEvent {
        assert_eq!(events.len(), 1, "expected one event, got {events:?}");
        let Some(event) = events.into_iter().next() else {
            panic!("no event");
        };
        event
    }

    #[test]
    fn masked_text_is_unmasked() {
        let payload = "héllo wörld".as_bytes();
        let mut frame = vec![0x81, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&MASK);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));

        let mut decoder = server_decoder();
        let event = single(decoder.decode(&frame));
        assert_eq!(
            event,
            WsEvent::Message {
                payload: Bytes::copy_from_slice(payload),
                is_text: true,
            }
        );
    }

    #[test]
    fn byte_at_a_time_matches_whole() {
        let frame = masked(true, Opcode::Binary, &[9u8; 300]);
        let mut decoder = server_decoder();
        let mut events = Vec::new();
        for byte in &frame {
            events.extend(decoder.decode(std::slice::from_ref(byte)));
        }
        let event = single(events);
        assert_eq!(
            event,
            WsEvent::Message {
                payload: Bytes::from(vec![9u8; 300]),
                is_text: false,
            }
        );
    }

    #[test]
    fn fragments_assemble_under_first_opcode_with_interleaved_ping() {
        let mut wire = masked(false, Opcode::Text, b"hel");
        wire.extend(masked(true, Opcode::Ping, b"p"));
        wire.extend(masked(false, Opcode::Continuation, b"lo "));
        wire.extend(masked(true, Opcode::Continuation, b"there"));

        let mut decoder = server_decoder();
        let events = decoder.decode(&wire);
        assert_eq!(
            events,
            vec![
                WsEvent::Ping(Bytes::from_static(b"p")),
                WsEvent::Message {
                    payload: Bytes::from_static(b"hello there"),
                    is_text: true,
                },
            ]
        );
        assert!(!decoder.in_message());
    }

    #[test]
    fn unmasked_frame_is_rejected_when_mask_required() {
        let mut decoder = server_decoder();
        let event = single(decoder.decode(&encode_message(b"x", true, true, true)));
        assert_eq!(event, WsEvent::ProtocolError(ProtocolViolation::UnmaskedFrame));
        assert!(decoder.is_closed());
        assert!(decoder.decode(&masked(true, Opcode::Text, b"y")).is_empty());
    }

    #[test]
    fn client_side_decoder_accepts_unmasked() {
        let mut decoder = FrameDecoder::new(false, 1024);
        let event = single(decoder.decode(&encode_message(b"x", false, true, true)));
        assert_eq!(
            event,
            WsEvent::Message {
                payload: Bytes::from_static(b"x"),
                is_text: false,
            }
        );
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut decoder = FrameDecoder::new(true, 100);
        let event = single(decoder.decode(&masked(true, Opcode::Binary, &[0u8; 101])));
        assert_eq!(
            event,
            WsEvent::ProtocolError(ProtocolViolation::MessageTooLarge {
                size: 101,
                limit: 100
            })
        );
    }

    #[test]
    fn oversized_assembled_message_is_rejected() {
        let mut decoder = FrameDecoder::new(true, 100);
        let mut wire = masked(false, Opcode::Binary, &[0u8; 60]);
        wire.extend(masked(true, Opcode::Continuation, &[0u8; 60]));
        let event = single(decoder.decode(&wire));
        assert!(matches!(
            event,
            WsEvent::ProtocolError(ProtocolViolation::MessageTooLarge { size: 120, .. })
        ));
    }

    #[test]
    fn sixty_four_bit_length_is_read_big_endian() {
        let payload = vec![3u8; 70_000];
        let frame = masked(true, Opcode::Binary, &payload);
        assert_eq!(frame[1] & 0x7F, 127);
        let mut decoder = server_decoder();
        let event = single(decoder.decode(&frame));
        assert_eq!(
            event,
            WsEvent::Message {
                payload: Bytes::from(payload),
                is_text: false,
            }
        );
    }

    #[test]
    fn control_frame_rules() {
        let mut decoder = server_decoder();
        let event = single(decoder.decode(&masked(false, Opcode::Ping, b"")));
        assert_eq!(event, WsEvent::ProtocolError(ProtocolViolation::FragmentedControl));

        let mut decoder = server_decoder();
        let event = single(decoder.decode(&masked(true, Opcode::Pong, &[0u8; 126])));
        assert_eq!(event, WsEvent::ProtocolError(ProtocolViolation::ControlTooLarge));
    }

    #[test]
    fn sequence_violations() {
        let mut decoder = server_decoder();
        let event = single(decoder.decode(&masked(true, Opcode::Continuation, b"x")));
        assert_eq!(event, WsEvent::ProtocolError(ProtocolViolation::UnexpectedContinuation));

        let mut decoder = server_decoder();
        let mut wire = masked(false, Opcode::Text, b"a");
        wire.extend(masked(true, Opcode::Binary, b"b"));
        let event = single(decoder.decode(&wire));
        assert_eq!(event, WsEvent::ProtocolError(ProtocolViolation::InterleavedData));
    }

    #[test]
    fn invalid_utf8_text_is_rejected() {
        let mut decoder = server_decoder();
        let event = single(decoder.decode(&masked(true, Opcode::Text, &[0xff, 0xfe])));
        assert_eq!(event, WsEvent::ProtocolError(ProtocolViolation::InvalidUtf8));
        assert_eq!(ProtocolViolation::InvalidUtf8.close_code(), 1007);
    }

    #[test]
    fn reserved_opcode_terminates_sequence_silently() {
        let mut decoder = server_decoder();
        let mut wire = masked(false, Opcode::Text, b"partial");
        wire.extend(masked(true, Opcode::Reserved(0x3), b"junk"));
        assert!(decoder.decode(&wire).is_empty());
        assert!(!decoder.in_message());

        let event = single(decoder.decode(&masked(true, Opcode::Text, b"next")));
        assert_eq!(
            event,
            WsEvent::Message {
                payload: Bytes::from_static(b"next"),
                is_text: true,
            }
        );
    }

    #[test]
    fn close_carries_status_and_stops_decoding() {
        let mut decoder = server_decoder();
        let mut wire = masked(true, Opcode::Close, &1001u16.to_be_bytes());
        wire.extend(masked(true, Opcode::Text, b"ignored"));
        let event = single(decoder.decode(&wire));
        assert_eq!(event, WsEvent::Close(Some(1001)));
        assert!(decoder.is_closed());
    }

    #[test]
    fn round_trip_through_encoder() {
        for len in [0usize, 1, 125, 126, 65_535, 200_000] {
            for is_text in [true, false] {
                let payload: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
                let wire = encode_message(&payload, is_text, true, true);
                let mut decoder = FrameDecoder::new(false, 1 << 20);
                let event = single(decoder.decode(&wire));
                assert_eq!(
                    event,
                    WsEvent::Message {
                        payload: Bytes::from(payload),
                        is_text,
                    },
                    "length {len}"
                );
            }
        }
    }
}
