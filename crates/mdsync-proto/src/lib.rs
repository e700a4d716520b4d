//! Wire codec for the multi-device mediator protocol.
//!
//! Every mediator frame starts with a 4-byte common header: one type byte
//! followed by three reserved zero bytes. Frames that do not match this shape
//! belong to the chat protocol and are proxied through unchanged.
//!
//! ```text
//! ┌──────┬──────────┬──────────────────────────────────────────┐
//! │ type │ 00 00 00 │ body (CBOR control message or reflect-   │
//! │  1B  │    3B    │ family binary layout)                    │
//! └──────┴──────────┴──────────────────────────────────────────┘
//! ```
//!
//! Control messages (hello, device list, transactions) carry CBOR bodies.
//! Reflect-family messages carry a small binary header followed by an
//! encrypted [`Envelope`]. Envelope plaintexts and the message bodies inside
//! them are CBOR as well.
//!
//! This crate only does framing and serialization. Encryption happens in
//! `mdsync-crypto`, protocol state in `mdsync-core`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod content;
pub mod envelope;
pub mod errors;
pub mod frame;
pub mod header;
pub mod message_type;
pub mod messages;
pub mod payloads;
pub mod sync;

pub use content::MessageContent;
pub use envelope::{ContentKind, Envelope, EnvelopeContent};
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, InboundFrame};
pub use header::{
    CommonHeader, PAYLOAD_HEADER, add_proxy_common_header, extract_chat_message,
    extract_chat_message_and_length, is_mediator_frame,
};
pub use message_type::MessageType;
pub use messages::{ConversationId, MessageId, MessageKind};
pub use payloads::{Payload, ReflectId};
pub use sync::GroupIdentity;

/// Decode a CBOR value from a byte slice.
pub(crate) fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

/// Encode a value as CBOR.
pub(crate) fn to_cbor<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(out)
}
