//! Wire codec errors.

use thiserror::Error;

use crate::{MessageKind, MessageType};

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing or (de)serializing mediator messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Input is shorter than the structure being parsed
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Frame body exceeds the maximum size
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual body size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Bytes do not carry a valid mediator common header
    #[error("not a mediator frame")]
    NotMediatorFrame,

    /// Type byte does not name a known message type
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Body was decoded as the wrong message type
    #[error("unexpected message type: expected {expected:?}, got {actual:?}")]
    UnexpectedMessageType {
        /// Message type the caller asked for
        expected: MessageType,
        /// Message type found in the frame
        actual: MessageType,
    },

    /// Reflect payload header does not match the fixed value
    #[error("invalid payload header: {0:02x?}")]
    InvalidPayloadHeader([u8; 4]),

    /// Reflected header length differs from the supported layout
    #[error("reflected header length mismatch: expected {expected}, got {actual}")]
    HeaderLengthMismatch {
        /// Supported header length
        expected: u8,
        /// Header length announced by the frame
        actual: u8,
    },

    /// Proxied chat frame length prefix disagrees with its body
    #[error("chat message length mismatch: declared {declared}, actual {actual}")]
    ChatLengthMismatch {
        /// Length from the u16 prefix
        declared: usize,
        /// Bytes following the prefix
        actual: usize,
    },

    /// Message kind cannot carry content
    #[error("message kind {0:?} carries no decodable content")]
    InvalidMessageKind(MessageKind),

    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
