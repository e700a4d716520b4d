//! Conversation messages and message state updates.
//!
//! Messages travel as an outer record (sender or conversation, id, kind) plus
//! an opaque `body`. The body is decoded into a
//! [`MessageContent`](crate::MessageContent) by its [`MessageKind`].

use serde::{Deserialize, Serialize};

use crate::sync::GroupIdentity;

/// Chat message id, unique per sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Conversation a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConversationId {
    /// One-to-one conversation with a contact
    Contact(String),
    /// Distribution list
    DistributionList(u64),
    /// Group conversation
    Group(GroupIdentity),
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contact(identity) => write!(f, "contact:{identity}"),
            Self::DistributionList(id) => write!(f, "list:{id:016x}"),
            Self::Group(group) => write!(f, "group:{group}"),
        }
    }
}

/// Closed set of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Text
    Text,
    /// Location
    Location,
    /// File (including modern images, audio, video)
    File,
    /// Legacy audio message
    DeprecatedAudio,
    /// Legacy image message
    DeprecatedImage,
    /// Legacy video message
    DeprecatedVideo,
    /// Poll creation
    PollSetup,
    /// Poll vote
    PollVote,
    /// Delivery receipt
    DeliveryReceipt,
    /// Typing indicator
    TypingIndicator,
    /// Contact set their profile picture
    ContactSetProfilePicture,
    /// Contact removed their profile picture
    ContactDeleteProfilePicture,
    /// Contact asks for the user's profile picture
    ContactRequestProfilePicture,
    /// Call offer
    CallOffer,
    /// Call answer
    CallAnswer,
    /// Call ICE candidates
    CallIceCandidate,
    /// Call hangup
    CallHangup,
    /// Call ringing
    CallRinging,
    /// Group text
    GroupText,
    /// Group location
    GroupLocation,
    /// Group file
    GroupFile,
    /// Legacy group audio
    GroupAudio,
    /// Legacy group image
    GroupImage,
    /// Legacy group video
    GroupVideo,
    /// Group poll creation
    GroupPollSetup,
    /// Group poll vote
    GroupPollVote,
    /// Group delivery receipt
    GroupDeliveryReceipt,
    /// Group setup (membership)
    GroupSetup,
    /// Group rename
    GroupRename,
    /// Member left the group
    GroupLeave,
    /// Group picture set
    GroupSetProfilePicture,
    /// Group picture removed
    GroupDeleteProfilePicture,
    /// Member asks the creator to resend group state
    GroupRequestSync,
    /// Group call started
    GroupCallStart,
    /// Unrecognized kind
    Invalid,
}

impl MessageKind {
    /// Kind is addressed to a group conversation.
    pub const fn is_group(self) -> bool {
        matches!(
            self,
            Self::GroupText
                | Self::GroupLocation
                | Self::GroupFile
                | Self::GroupAudio
                | Self::GroupImage
                | Self::GroupVideo
                | Self::GroupPollSetup
                | Self::GroupPollVote
                | Self::GroupDeliveryReceipt
                | Self::GroupSetup
                | Self::GroupRename
                | Self::GroupLeave
                | Self::GroupSetProfilePicture
                | Self::GroupDeleteProfilePicture
                | Self::GroupRequestSync
                | Self::GroupCallStart
        )
    }

    /// Kind is one-to-one call signalling.
    pub const fn is_call_signal(self) -> bool {
        matches!(
            self,
            Self::CallOffer
                | Self::CallAnswer
                | Self::CallIceCandidate
                | Self::CallHangup
                | Self::CallRinging
        )
    }

    /// Legacy media kinds superseded by [`MessageKind::File`].
    pub const fn is_deprecated_media(self) -> bool {
        matches!(
            self,
            Self::DeprecatedAudio
                | Self::DeprecatedImage
                | Self::DeprecatedVideo
                | Self::GroupAudio
                | Self::GroupImage
                | Self::GroupVideo
        )
    }
}

/// Message received by another device of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Sender identity
    pub sender_identity: String,
    /// Message id
    pub message_id: MessageId,
    /// Creation time set by the sender (ms)
    pub created_at: u64,
    /// Message kind
    pub kind: MessageKind,
    /// CBOR-encoded content
    pub body: Vec<u8>,
    /// Nonce the sender encrypted the message with
    pub nonce: [u8; 24],
}

/// Message sent by another device of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Receiving conversation
    pub conversation: ConversationId,
    /// Message id
    pub message_id: MessageId,
    /// Id of the message this one belongs to (distribution list fan-out)
    pub thread_message_id: Option<MessageId>,
    /// Creation time (ms)
    pub created_at: u64,
    /// Message kind
    pub kind: MessageKind,
    /// CBOR-encoded content
    pub body: Vec<u8>,
    /// Nonces the message was encrypted with, one per recipient
    pub nonces: Vec<[u8; 24]>,
}

/// An incoming message was read on another device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessageRead {
    /// Conversation of the message
    pub conversation: ConversationId,
    /// Message id
    pub message_id: MessageId,
    /// Read time (ms)
    pub read_at: u64,
}

/// Batch of incoming message updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessageUpdate {
    /// Messages marked read
    pub updates: Vec<IncomingMessageRead>,
}

/// An outgoing message was delivered to the chat server by another device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessageSent {
    /// Conversation of the message
    pub conversation: ConversationId,
    /// Message id
    pub message_id: MessageId,
}

/// Batch of outgoing message updates.
///
/// The sent time is the mediator timestamp of the carrying `Reflected` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessageUpdate {
    /// Messages marked sent
    pub updates: Vec<OutgoingMessageSent>,
}
