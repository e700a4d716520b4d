//! Common header parsing and chat-frame proxy helpers.
//!
//! The mediator shares one transport with the chat protocol. A frame is a
//! mediator frame only when it is at least four bytes long, its type byte is
//! not [`MessageType::Proxy`] and the three reserved bytes are zero. Anything
//! else is treated as an opaque chat frame and passed through.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MessageType,
    errors::{ProtocolError, Result},
};

/// Fixed payload header preceding the reflect ID in reflect-family bodies.
///
/// The first byte is the header length (payload header plus reflect ID).
pub const PAYLOAD_HEADER: [u8; 4] = [0x08, 0x00, 0x00, 0x00];

/// 4-byte common header of every mediator frame.
///
/// All bit patterns are valid, so the struct can be cast from untrusted bytes.
/// Validation of the reserved bytes happens in [`CommonHeader::from_bytes`].
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CommonHeader {
    message_type: u8,
    reserved: [u8; 3],
}

impl CommonHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 4;

    /// Header for the given message type.
    #[must_use]
    pub const fn new(message_type: MessageType) -> Self {
        Self { message_type: message_type.to_u8(), reserved: [0; 3] }
    }

    /// Parse the header at the start of `bytes` (zero-copy).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than four bytes are present
    /// - `ProtocolError::NotMediatorFrame` if the type is `Proxy` or a
    ///   reserved byte is set
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if header.message_type == MessageType::Proxy.to_u8() || header.reserved != [0; 3] {
            return Err(ProtocolError::NotMediatorFrame);
        }

        Ok(header)
    }

    /// Raw type byte, which may not name a known message type.
    pub const fn message_type_raw(&self) -> u8 {
        self.message_type
    }

    /// Parsed message type. `None` for unknown values.
    pub const fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Serialized header bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

impl std::fmt::Debug for CommonHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonHeader")
            .field("message_type", &format_args!("{:#04x}", self.message_type))
            .finish()
    }
}

/// Whether `bytes` carries a mediator common header.
pub fn is_mediator_frame(bytes: &[u8]) -> bool {
    CommonHeader::from_bytes(bytes).is_ok()
}

/// Wrap a chat-protocol frame in a proxy common header.
pub fn add_proxy_common_header(chat: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CommonHeader::SIZE + chat.len());
    out.extend_from_slice(&[MessageType::Proxy.to_u8(), 0, 0, 0]);
    out.extend_from_slice(chat);
    out
}

/// Strip the 4-byte common header from a proxied chat frame.
///
/// # Errors
///
/// - `ProtocolError::FrameTooShort` if the frame is shorter than the header
pub fn extract_chat_message(frame: &[u8]) -> Result<&[u8]> {
    frame.get(CommonHeader::SIZE..).ok_or(ProtocolError::FrameTooShort {
        expected: CommonHeader::SIZE,
        actual: frame.len(),
    })
}

/// Strip the common header and a little-endian u16 length prefix.
///
/// The returned slice is exactly the declared length.
///
/// # Errors
///
/// - `ProtocolError::FrameTooShort` if header or length prefix are missing
/// - `ProtocolError::ChatLengthMismatch` if the prefix disagrees with the
///   remaining bytes
pub fn extract_chat_message_and_length(frame: &[u8]) -> Result<&[u8]> {
    let chat = extract_chat_message(frame)?;
    let Some((prefix, rest)) = chat.split_first_chunk::<2>() else {
        return Err(ProtocolError::FrameTooShort {
            expected: CommonHeader::SIZE + 2,
            actual: frame.len(),
        });
    };

    let declared = usize::from(u16::from_le_bytes(*prefix));
    if declared != rest.len() {
        return Err(ProtocolError::ChatLengthMismatch { declared, actual: rest.len() });
    }

    Ok(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mediator_frame_detection() {
        assert!(is_mediator_frame(&[0x10, 0, 0, 0]));
        assert!(is_mediator_frame(&[0x82, 0, 0, 0, 1, 2, 3]));
        // Unknown types still count as mediator frames
        assert!(is_mediator_frame(&[0x7f, 0, 0, 0]));

        assert!(!is_mediator_frame(&[0x00, 0, 0, 0, 9]));
        assert!(!is_mediator_frame(&[0x10, 0, 1, 0]));
        assert!(!is_mediator_frame(&[0x10, 0, 0]));
        assert!(!is_mediator_frame(&[]));
    }

    #[test]
    fn header_from_bytes() {
        let header = CommonHeader::from_bytes(&[0x41, 0, 0, 0, 0xff]).unwrap();
        assert_eq!(header.message_type(), Some(MessageType::LockAck));
        assert_eq!(header.to_bytes(), [0x41, 0, 0, 0]);

        let unknown = CommonHeader::from_bytes(&[0x7f, 0, 0, 0]).unwrap();
        assert_eq!(unknown.message_type(), None);
        assert_eq!(unknown.message_type_raw(), 0x7f);
    }

    #[test]
    fn header_too_short() {
        let result = CommonHeader::from_bytes(&[0x10, 0]);
        assert_eq!(result, Err(ProtocolError::FrameTooShort { expected: 4, actual: 2 }));
    }

    #[test]
    fn proxy_roundtrip() {
        let wrapped = add_proxy_common_header(b"chat");
        assert_eq!(&wrapped[..4], &[0, 0, 0, 0]);
        assert!(!is_mediator_frame(&wrapped));
        assert_eq!(extract_chat_message(&wrapped).unwrap(), b"chat");
    }

    #[test]
    fn extract_chat_short_frame() {
        assert!(matches!(extract_chat_message(&[0, 0]), Err(ProtocolError::FrameTooShort { .. })));
    }

    #[test]
    fn chat_with_length_prefix() {
        let frame = [0, 0, 0, 0, 3, 0, b'a', b'b', b'c'];
        assert_eq!(extract_chat_message_and_length(&frame).unwrap(), b"abc");
    }

    #[test]
    fn chat_length_mismatch() {
        let frame = [0, 0, 0, 0, 5, 0, b'a', b'b', b'c'];
        assert_eq!(
            extract_chat_message_and_length(&frame),
            Err(ProtocolError::ChatLengthMismatch { declared: 5, actual: 3 })
        );

        let missing_prefix = [0, 0, 0, 0, 3];
        assert!(matches!(
            extract_chat_message_and_length(&missing_prefix),
            Err(ProtocolError::FrameTooShort { .. })
        ));
    }
}
