//! Reflect-family messages.
//!
//! These carry binary bodies rather than CBOR so the mediator can route them
//! without parsing the encrypted envelope.
//!
//! ```text
//! Reflect / ReflectAck / ReflectedAck:
//! ┌──────────────┬─────────────┬──────────────────────┐
//! │ 08 00 00 00  │ reflect id  │ envelope (Reflect)   │
//! └──────────────┴─────────────┴──────────────────────┘
//!
//! Reflected:
//! ┌─────┬───────┬───────┬─────────────┬──────────────┬──────────┐
//! │ len │ flags │ 00 00 │ reflect id  │ timestamp LE │ envelope │
//! │ 1B  │  1B   │  2B   │     4B      │      8B      │          │
//! └─────┴───────┴───────┴─────────────┴──────────────┴──────────┘
//! ```

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    PAYLOAD_HEADER,
    errors::{ProtocolError, Result},
};

/// Four random bytes correlating a reflect with its ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReflectId(pub [u8; 4]);

impl ReflectId {
    /// Build from a little-endian u32.
    pub const fn from_u32(value: u32) -> Self {
        Self(value.to_le_bytes())
    }

    /// Little-endian u32 value.
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl std::fmt::Display for ReflectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct ReflectPrefix {
    payload_header: [u8; 4],
    reflect_id: [u8; 4],
}

impl ReflectPrefix {
    const SIZE: usize = 8;

    fn parse(bytes: &[u8]) -> Result<(&Self, &[u8])> {
        Self::ref_from_prefix(bytes).map_err(|_| ProtocolError::FrameTooShort {
            expected: Self::SIZE,
            actual: bytes.len(),
        })
    }

    fn write(reflect_id: ReflectId, dst: &mut impl BufMut) {
        let prefix = Self { payload_header: PAYLOAD_HEADER, reflect_id: reflect_id.0 };
        dst.put_slice(prefix.as_bytes());
    }
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct ReflectedHeader {
    header_length: u8,
    flags: u8,
    _reserved: [u8; 2],
    reflect_id: [u8; 4],
    timestamp: [u8; 8],
}

impl ReflectedHeader {
    const SIZE: usize = 16;
}

/// Envelope sent to the other devices of the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflect {
    /// Correlation id
    pub reflect_id: ReflectId,
    /// Encrypted envelope (`nonce ‖ ciphertext`)
    pub envelope: Bytes,
}

impl Reflect {
    pub(crate) fn encode(&self, dst: &mut impl BufMut) {
        ReflectPrefix::write(self.reflect_id, dst);
        dst.put_slice(&self.envelope);
    }

    pub(crate) fn decode(payload: &Bytes) -> Result<Self> {
        let (prefix, _) = ReflectPrefix::parse(payload)?;
        if prefix.payload_header != PAYLOAD_HEADER {
            return Err(ProtocolError::InvalidPayloadHeader(prefix.payload_header));
        }

        Ok(Self {
            reflect_id: ReflectId(prefix.reflect_id),
            envelope: payload.slice(ReflectPrefix::SIZE..),
        })
    }
}

/// Mediator stored a [`Reflect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectAck {
    /// Correlation id of the acknowledged reflect
    pub reflect_id: ReflectId,
}

impl ReflectAck {
    pub(crate) fn encode(&self, dst: &mut impl BufMut) {
        ReflectPrefix::write(self.reflect_id, dst);
    }

    /// Trailing bytes after the reflect id are ignored.
    pub(crate) fn decode(payload: &[u8]) -> Result<Self> {
        let (prefix, _) = ReflectPrefix::parse(payload)?;
        Ok(Self { reflect_id: ReflectId(prefix.reflect_id) })
    }
}

/// Envelope received from another device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflected {
    /// Mediator-assigned id, echoed in the [`ReflectedAck`]
    pub reflect_id: ReflectId,
    /// Flag bits, currently unused
    pub flags: u8,
    /// Time the mediator stored the envelope (ms since the Unix epoch)
    pub timestamp_ms: u64,
    /// Encrypted envelope (`nonce ‖ ciphertext`)
    pub envelope: Bytes,
}

impl Reflected {
    /// Supported header length.
    pub const HEADER_LENGTH: u8 = ReflectedHeader::SIZE as u8;

    pub(crate) fn encode(&self, dst: &mut impl BufMut) {
        let header = ReflectedHeader {
            header_length: Self::HEADER_LENGTH,
            flags: self.flags,
            _reserved: [0; 2],
            reflect_id: self.reflect_id.0,
            timestamp: self.timestamp_ms.to_le_bytes(),
        };
        dst.put_slice(header.as_bytes());
        dst.put_slice(&self.envelope);
    }

    /// Header length other than 16 is rejected rather than skipped.
    pub(crate) fn decode(payload: &Bytes) -> Result<Self> {
        let (header, _) = ReflectedHeader::ref_from_prefix(payload).map_err(|_| {
            ProtocolError::FrameTooShort { expected: ReflectedHeader::SIZE, actual: payload.len() }
        })?;

        if header.header_length != Self::HEADER_LENGTH {
            return Err(ProtocolError::HeaderLengthMismatch {
                expected: Self::HEADER_LENGTH,
                actual: header.header_length,
            });
        }

        Ok(Self {
            reflect_id: ReflectId(header.reflect_id),
            flags: header.flags,
            timestamp_ms: u64::from_le_bytes(header.timestamp),
            envelope: payload.slice(usize::from(header.header_length)..),
        })
    }
}

/// Device finished processing a [`Reflected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectedAck {
    /// Correlation id of the processed reflected message
    pub reflect_id: ReflectId,
}

impl ReflectedAck {
    pub(crate) fn encode(&self, dst: &mut impl BufMut) {
        ReflectPrefix::write(self.reflect_id, dst);
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Self> {
        let (prefix, _) = ReflectPrefix::parse(payload)?;
        Ok(Self { reflect_id: ReflectId(prefix.reflect_id) })
    }
}
