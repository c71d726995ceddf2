//! RFC6455 frame layout and the outbound encoder.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               | Masking-key, if MASK set to 1 |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! Headers are built with explicit shifts and masks over raw bytes; all
//! multi-byte lengths are big-endian.

/// Largest payload carried by a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest chunk the encoder puts in one data frame before fragmenting.
pub const MAX_FRAGMENT: usize = 65532;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation of a fragmented message (0x0).
    Continuation,
    /// UTF-8 text (0x1).
    Text,
    /// Binary data (0x2).
    Binary,
    /// Connection close (0x8).
    Close,
    /// Ping (0x9).
    Ping,
    /// Pong (0xA).
    Pong,
    /// Any opcode RFC6455 leaves reserved.
    Reserved(u8),
}

impl Opcode {
    /// Decodes the low four bits of the first header byte.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & OPCODE_MASK {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// Returns the four-bit wire value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(bits) => bits & OPCODE_MASK,
        }
    }

    /// Close, ping and pong.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Decoded or to-be-encoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1..RSV3 as the low three bits.
    pub rsv: u8,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Masking key, present on client-to-server frames.
    pub mask: Option<[u8; 4]>,
    /// Payload length in bytes.
    pub payload_len: u64,
}

impl FrameHeader {
    /// Header for an unmasked frame.
    #[must_use]
    pub const fn new(fin: bool, opcode: Opcode, payload_len: u64) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            mask: None,
            payload_len,
        }
    }

    /// Number of bytes the encoded header occupies.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        let base = if self.payload_len < LEN_16 as u64 {
            2
        } else if self.payload_len <= u16::MAX as u64 {
            4
        } else {
            10
        };
        if self.mask.is_some() { base + 4 } else { base }
    }

    /// Appends the encoded header to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut first = ((self.rsv & 0x07) << 4) | self.opcode.bits();
        if self.fin {
            first |= FIN_BIT;
        }
        let mask_flag = if self.mask.is_some() { MASK_BIT } else { 0 };
        out.push(first);

        if self.payload_len < u64::from(LEN_16) {
            // Guarded by the branch: the length fits in seven bits.
            out.push(mask_flag | (self.payload_len as u8));
        } else if let Ok(len) = u16::try_from(self.payload_len) {
            out.push(mask_flag | LEN_16);
            out.extend_from_slice(&len.to_be_bytes());
        } else {
            out.push(mask_flag | LEN_64);
            out.extend_from_slice(&self.payload_len.to_be_bytes());
        }

        if let Some(mask) = self.mask {
            out.extend_from_slice(&mask);
        }
    }
}

/// XORs `data` with `mask`, where `offset` is the position of `data[0]`
/// within the frame payload.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4], offset: usize) {
    for (byte, key) in data.iter_mut().zip(mask.iter().cycle().skip(offset % 4)) {
        *byte ^= key;
    }
}

/// Encodes a single frame. When `mask` is set the payload is masked.
#[must_use]
pub fn encode_frame(fin: bool, opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let header = FrameHeader {
        mask,
        ..FrameHeader::new(fin, opcode, payload.len() as u64)
    };
    let mut out = Vec::with_capacity(header.encoded_len() + payload.len());
    header.write_to(&mut out);
    let start = out.len();
    out.extend_from_slice(payload);
    if let (Some(mask), Some(body)) = (mask, out.get_mut(start..)) {
        apply_mask(body, mask, 0);
    }
    out
}

/// Encodes an outgoing (unmasked) message, fragmenting payloads above
/// [`MAX_FRAGMENT`] bytes.
///
/// `is_first` selects the text/binary opcode for the first frame (otherwise
/// continuation); `is_last` sets `fin` on the final frame. Streaming a large
/// message in pieces therefore calls this with `is_first` only on the first
/// piece and `is_last` only on the final one.
#[must_use]
pub fn encode_message(payload: &[u8], is_text: bool, is_first: bool, is_last: bool) -> Vec<u8> {
    let data_opcode = if is_text { Opcode::Text } else { Opcode::Binary };
    let frames = payload.len().div_ceil(MAX_FRAGMENT).max(1);
    let mut out = Vec::with_capacity(payload.len() + frames * 4);

    let mut chunks = payload.chunks(MAX_FRAGMENT).peekable();
    let mut first_frame = true;
    loop {
        let chunk = chunks.next().unwrap_or_default();
        let last_chunk = chunks.peek().is_none();
        let opcode = if first_frame && is_first {
            data_opcode
        } else {
            Opcode::Continuation
        };
        let header = FrameHeader::new(is_last && last_chunk, opcode, chunk.len() as u64);
        header.write_to(&mut out);
        out.extend_from_slice(chunk);
        first_frame = false;
        if last_chunk {
            break;
        }
    }
    out
}

/// Encodes a ping frame.
#[must_use]
pub fn ping_frame(payload: &[u8]) -> Vec<u8> {
    let payload = payload.get(..MAX_CONTROL_PAYLOAD).unwrap_or(payload);
    encode_frame(true, Opcode::Ping, payload, None)
}

/// Encodes a pong frame echoing `payload`.
#[must_use]
pub fn pong_frame(payload: &[u8]) -> Vec<u8> {
    let payload = payload.get(..MAX_CONTROL_PAYLOAD).unwrap_or(payload);
    encode_frame(true, Opcode::Pong, payload, None)
}

/// Encodes a close frame, zero-length unless a status `code` is given.
#[must_use]
pub fn close_frame(code: Option<u16>) -> Vec<u8> {
    match code {
        Some(code) => encode_frame(true, Opcode::Close, &code.to_be_bytes(), None),
        None => encode_frame(true, Opcode::Close, &[], None),
    }
}
