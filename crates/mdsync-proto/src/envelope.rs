//! Device-to-device envelope.
//!
//! The envelope is the plaintext of every `Reflect` / `Reflected` frame. It is
//! CBOR-encoded and then sealed under the reflect key by the envelope cipher.

use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    from_cbor,
    messages::{IncomingMessage, IncomingMessageUpdate, OutgoingMessage, OutgoingMessageUpdate},
    sync::{
        ContactSync, DistributionListSync, GroupSync, MdmParameterSync, SettingsSync,
        UserProfileSync,
    },
    to_cbor,
};

/// Content of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeContent {
    /// Contact create/update/delete
    ContactSync(ContactSync),
    /// Group create/update/delete
    GroupSync(GroupSync),
    /// Distribution list create/update/delete
    DistributionListSync(DistributionListSync),
    /// Message received by another device
    IncomingMessage(IncomingMessage),
    /// Incoming messages read on another device
    IncomingMessageUpdate(IncomingMessageUpdate),
    /// Message sent by another device
    OutgoingMessage(OutgoingMessage),
    /// Outgoing messages sent by another device
    OutgoingMessageUpdate(OutgoingMessageUpdate),
    /// User profile change
    UserProfileSync(UserProfileSync),
    /// Settings change
    SettingsSync(SettingsSync),
    /// MDM parameter change
    MdmParameterSync(MdmParameterSync),
}

/// Kind tag of [`EnvelopeContent`], used in logs and routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// Contact sync
    ContactSync,
    /// Group sync
    GroupSync,
    /// Distribution list sync
    DistributionListSync,
    /// Incoming message
    IncomingMessage,
    /// Incoming message update
    IncomingMessageUpdate,
    /// Outgoing message
    OutgoingMessage,
    /// Outgoing message update
    OutgoingMessageUpdate,
    /// User profile sync
    UserProfileSync,
    /// Settings sync
    SettingsSync,
    /// MDM parameter sync
    MdmParameterSync,
}

impl EnvelopeContent {
    /// Kind tag.
    pub const fn kind(&self) -> ContentKind {
        match self {
            Self::ContactSync(_) => ContentKind::ContactSync,
            Self::GroupSync(_) => ContentKind::GroupSync,
            Self::DistributionListSync(_) => ContentKind::DistributionListSync,
            Self::IncomingMessage(_) => ContentKind::IncomingMessage,
            Self::IncomingMessageUpdate(_) => ContentKind::IncomingMessageUpdate,
            Self::OutgoingMessage(_) => ContentKind::OutgoingMessage,
            Self::OutgoingMessageUpdate(_) => ContentKind::OutgoingMessageUpdate,
            Self::UserProfileSync(_) => ContentKind::UserProfileSync,
            Self::SettingsSync(_) => ContentKind::SettingsSync,
            Self::MdmParameterSync(_) => ContentKind::MdmParameterSync,
        }
    }
}

/// Envelope plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Random padding hiding the content length
    pub padding: Vec<u8>,
    /// Mediator device id of the sender
    pub device_id: u64,
    /// Content
    pub content: EnvelopeContent,
}

impl Envelope {
    /// Maximum padding length produced by senders.
    pub const MAX_PADDING: usize = 15;

    /// CBOR encoding.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    /// Parse CBOR encoding.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the bytes are not a valid envelope
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }

    /// Kind of the carried content.
    pub const fn kind(&self) -> ContentKind {
        self.content.kind()
    }
}
