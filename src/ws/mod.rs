//! WebSocket layer: RFC6455 framing, session state machine, payload codec
//! and the upgrade handshake.
//!
//! The framer is a pure codec: [`frame::encode_message`] turns a payload
//! into one or more unmasked server frames, and [`FrameDecoder`] turns
//! client bytes into [`WsEvent`]s across arbitrary read boundaries.
//! [`WsSession`] adds the per-connection protocol duties (pong replies,
//! close handshake, outbound queue).

pub mod codec;
pub mod decoder;
pub mod frame;
pub mod handshake;
pub mod session;

pub use codec::{CodecError, Identity, PayloadCodec};
pub use decoder::{FrameDecoder, ProtocolViolation, WsEvent};
pub use frame::{FrameHeader, Opcode};
pub use handshake::HandshakeError;
pub use session::{Message, SessionState, WsSession};
