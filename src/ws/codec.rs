//! Optional per-connection payload transformation.
//!
//! Compression extensions are negotiated out of band. Once negotiated, the
//! session runs every outbound payload through [`PayloadCodec::encode`]
//! before framing and every inbound message through
//! [`PayloadCodec::decode`] after reassembly.

use std::fmt;

use bytes::Bytes;

/// A payload transformation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload codec failed: {0}")]
pub struct CodecError(pub String);

/// Transforms message payloads around the framer.
pub trait PayloadCodec: Send + fmt::Debug {
    /// Transforms an outbound payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload cannot be encoded.
    fn encode(&mut self, payload: &[u8]) -> Result<Bytes, CodecError>;

    /// Transforms an inbound payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload cannot be decoded.
    fn decode(&mut self, payload: Bytes) -> Result<Bytes, CodecError>;
}

/// Pass-through codec used when nothing was negotiated.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl PayloadCodec for Identity {
    fn encode(&mut self, payload: &[u8]) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(payload))
    }

    fn decode(&mut self, payload: Bytes) -> Result<Bytes, CodecError> {
        Ok(payload)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_transparent() {
        let mut codec = Identity;
        let Ok(encoded) = codec.encode(b"abc") else {
            panic!("identity encode");
        };
        assert_eq!(encoded.as_ref(), b"abc");
        let Ok(decoded) = codec.decode(encoded) else {
            panic!("identity decode");
        };
        assert_eq!(decoded.as_ref(), b"abc");
    }
}
