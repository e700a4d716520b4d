//! Mediator frames and inbound classification.
//!
//! A [`Frame`] is the common header plus the raw body bytes. It does not
//! interpret the body; see [`Payload::into_frame`](crate::Payload::into_frame)
//! and [`Payload::from_frame`](crate::Payload::from_frame) for that.

use bytes::{BufMut, Bytes};

use crate::{
    CommonHeader, MessageType,
    errors::{ProtocolError, Result},
};

/// Complete mediator frame.
///
/// Layout on the wire: `[CommonHeader: 4 bytes] + [body: variable]`
///
/// # Invariants
///
/// - The header always passes [`CommonHeader::from_bytes`] validation: the
///   type is not `Proxy` and the reserved bytes are zero.
/// - `payload.len()` never exceeds [`Frame::MAX_PAYLOAD_SIZE`] on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Common header
    pub header: CommonHeader,

    /// Raw body bytes after the common header
    pub payload: Bytes,
}

impl Frame {
    /// Maximum body size (16 MB)
    pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

    /// Create a frame for a known message type.
    #[must_use]
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        debug_assert_ne!(message_type, MessageType::Proxy);
        Self { header: CommonHeader::new(message_type), payload: payload.into() }
    }

    /// Parsed message type. `None` when the type byte is unknown.
    pub fn message_type(&self) -> Option<MessageType> {
        self.header.message_type()
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        CommonHeader::SIZE + self.payload.len()
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the body exceeds
    ///   [`Frame::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// Same as [`Frame::encode`].
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Decode a mediator frame. The body is not interpreted.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if the header is truncated
    /// - `ProtocolError::NotMediatorFrame` for proxied chat frames
    /// - `ProtocolError::PayloadTooLarge` if the body is oversized
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *CommonHeader::from_bytes(bytes)?;
        let body = &bytes[CommonHeader::SIZE..];

        if body.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: body.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self { header, payload: Bytes::copy_from_slice(body) })
    }
}

/// Result of classifying bytes read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Frame addressed to the mediator protocol
    Mediator(Frame),
    /// Chat-protocol frame, passed through untouched (header included)
    Chat(Bytes),
}

impl InboundFrame {
    /// Classify raw transport bytes.
    ///
    /// Never fails on malformed chat frames: anything without a valid mediator
    /// header is treated as chat.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if a mediator frame is oversized
    pub fn classify(bytes: Bytes) -> Result<Self> {
        match Frame::decode(&bytes) {
            Ok(frame) => Ok(Self::Mediator(frame)),
            Err(ProtocolError::FrameTooShort { .. } | ProtocolError::NotMediatorFrame) => {
                Ok(Self::Chat(bytes))
            },
            Err(e) => Err(e),
        }
    }
}
