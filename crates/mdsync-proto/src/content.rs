//! Typed message content.
//!
//! [`MessageContent`] is the closed set of concrete message bodies. Decoding
//! is an exhaustive match on [`MessageKind`], so adding a kind without a
//! content type is a compile error.

use serde::{Deserialize, Serialize};

use crate::{
    MessageId, MessageKind,
    errors::{ProtocolError, Result},
    from_cbor,
    sync::{Blob, GroupIdentity},
    to_cbor,
};

/// Text message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    /// Message text
    pub text: String,
}

/// Shared location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Accuracy in meters
    pub accuracy: Option<f64>,
    /// Place name
    pub name: Option<String>,
    /// Postal address
    pub address: Option<String>,
}

/// File message. Also used for modern images, audio and video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    /// File blob
    pub blob: Blob,
    /// Thumbnail blob
    pub thumbnail: Option<Blob>,
    /// MIME type
    pub media_type: String,
    /// Original file name
    pub file_name: Option<String>,
    /// Size in bytes
    pub file_size: u64,
    /// Caption
    pub caption: Option<String>,
}

/// Legacy audio, image or video message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprecatedMedia {
    /// Media blob
    pub blob: Blob,
    /// Size in bytes
    pub size: u64,
    /// Duration for audio and video
    pub duration_secs: Option<u32>,
}

/// One choice of a poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollChoice {
    /// Choice id
    pub id: u32,
    /// Choice label
    pub name: String,
}

/// Poll creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSetup {
    /// Poll id chosen by the creator
    pub poll_id: u64,
    /// Question
    pub description: String,
    /// Choices
    pub choices: Vec<PollChoice>,
    /// More than one choice may be selected
    pub multiple_choice: bool,
    /// Poll no longer accepts votes
    pub closed: bool,
}

/// Vote on one poll choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollChoiceVote {
    /// Choice id
    pub choice_id: u32,
    /// Choice selected
    pub selected: bool,
}

/// Poll vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollVote {
    /// Identity of the poll creator
    pub poll_creator: String,
    /// Poll id
    pub poll_id: u64,
    /// Votes
    pub votes: Vec<PollChoiceVote>,
}

/// Receipt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// Delivered to the device
    Received,
    /// Read by the user
    Read,
    /// Reacted with acknowledge
    Acknowledged,
    /// Reacted with decline
    Declined,
}

/// Delivery receipt for one or more messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Receipt status
    pub status: ReceiptStatus,
    /// Messages the receipt applies to
    pub message_ids: Vec<MessageId>,
}

/// Typing indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypingIndicator {
    /// User is typing
    pub typing: bool,
}

/// New profile picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetProfilePicture {
    /// Picture blob
    pub blob: Blob,
}

/// One-to-one call signalling message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSignal {
    /// Call id
    pub call_id: u32,
    /// Signalling payload (SDP, candidates, reason)
    pub payload: Vec<u8>,
}

/// Group content wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grouped<T> {
    /// Target group
    pub group: GroupIdentity,
    /// Content
    pub inner: T,
}

/// Group membership announcement by the creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSetup {
    /// Members other than the creator
    pub members: Vec<String>,
}

/// Group rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRename {
    /// New name
    pub name: String,
}

/// Group call start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCallStart {
    /// Call protocol version
    pub protocol_version: u32,
    /// Group call key
    pub gck: [u8; 32],
    /// SFU base URL
    pub sfu_base_url: String,
}

/// Concrete message content.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// Text
    Text(Text),
    /// Location
    Location(Location),
    /// File
    File(File),
    /// Legacy audio
    DeprecatedAudio(DeprecatedMedia),
    /// Legacy image
    DeprecatedImage(DeprecatedMedia),
    /// Legacy video
    DeprecatedVideo(DeprecatedMedia),
    /// Poll creation
    PollSetup(PollSetup),
    /// Poll vote
    PollVote(PollVote),
    /// Delivery receipt
    DeliveryReceipt(DeliveryReceipt),
    /// Typing indicator
    TypingIndicator(TypingIndicator),
    /// Contact profile picture set
    ContactSetProfilePicture(SetProfilePicture),
    /// Contact profile picture removed
    ContactDeleteProfilePicture,
    /// Profile picture requested
    ContactRequestProfilePicture,
    /// Call offer
    CallOffer(CallSignal),
    /// Call answer
    CallAnswer(CallSignal),
    /// Call ICE candidates
    CallIceCandidate(CallSignal),
    /// Call hangup
    CallHangup(CallSignal),
    /// Call ringing
    CallRinging(CallSignal),
    /// Group text
    GroupText(Grouped<Text>),
    /// Group location
    GroupLocation(Grouped<Location>),
    /// Group file
    GroupFile(Grouped<File>),
    /// Legacy group audio
    GroupAudio(Grouped<DeprecatedMedia>),
    /// Legacy group image
    GroupImage(Grouped<DeprecatedMedia>),
    /// Legacy group video
    GroupVideo(Grouped<DeprecatedMedia>),
    /// Group poll creation
    GroupPollSetup(Grouped<PollSetup>),
    /// Group poll vote
    GroupPollVote(Grouped<PollVote>),
    /// Group delivery receipt
    GroupDeliveryReceipt(Grouped<DeliveryReceipt>),
    /// Group setup
    GroupSetup(Grouped<GroupSetup>),
    /// Group rename
    GroupRename(Grouped<GroupRename>),
    /// Member left
    GroupLeave(GroupIdentity),
    /// Group picture set
    GroupSetProfilePicture(Grouped<SetProfilePicture>),
    /// Group picture removed
    GroupDeleteProfilePicture(GroupIdentity),
    /// Group sync request
    GroupRequestSync(GroupIdentity),
    /// Group call start
    GroupCallStart(Grouped<GroupCallStart>),
}

impl MessageContent {
    /// Decode a message body by its kind.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidMessageKind` for [`MessageKind::Invalid`]
    /// - `ProtocolError::CborDecode` if the body does not match the kind
    pub fn decode(kind: MessageKind, body: &[u8]) -> Result<Self> {
        let content = match kind {
            MessageKind::Text => Self::Text(from_cbor(body)?),
            MessageKind::Location => Self::Location(from_cbor(body)?),
            MessageKind::File => Self::File(from_cbor(body)?),
            MessageKind::DeprecatedAudio => Self::DeprecatedAudio(from_cbor(body)?),
            MessageKind::DeprecatedImage => Self::DeprecatedImage(from_cbor(body)?),
            MessageKind::DeprecatedVideo => Self::DeprecatedVideo(from_cbor(body)?),
            MessageKind::PollSetup => Self::PollSetup(from_cbor(body)?),
            MessageKind::PollVote => Self::PollVote(from_cbor(body)?),
            MessageKind::DeliveryReceipt => Self::DeliveryReceipt(from_cbor(body)?),
            MessageKind::TypingIndicator => Self::TypingIndicator(from_cbor(body)?),
            MessageKind::ContactSetProfilePicture => {
                Self::ContactSetProfilePicture(from_cbor(body)?)
            },
            MessageKind::ContactDeleteProfilePicture => Self::ContactDeleteProfilePicture,
            MessageKind::ContactRequestProfilePicture => Self::ContactRequestProfilePicture,
            MessageKind::CallOffer => Self::CallOffer(from_cbor(body)?),
            MessageKind::CallAnswer => Self::CallAnswer(from_cbor(body)?),
            MessageKind::CallIceCandidate => Self::CallIceCandidate(from_cbor(body)?),
            MessageKind::CallHangup => Self::CallHangup(from_cbor(body)?),
            MessageKind::CallRinging => Self::CallRinging(from_cbor(body)?),
            MessageKind::GroupText => Self::GroupText(from_cbor(body)?),
            MessageKind::GroupLocation => Self::GroupLocation(from_cbor(body)?),
            MessageKind::GroupFile => Self::GroupFile(from_cbor(body)?),
            MessageKind::GroupAudio => Self::GroupAudio(from_cbor(body)?),
            MessageKind::GroupImage => Self::GroupImage(from_cbor(body)?),
            MessageKind::GroupVideo => Self::GroupVideo(from_cbor(body)?),
            MessageKind::GroupPollSetup => Self::GroupPollSetup(from_cbor(body)?),
            MessageKind::GroupPollVote => Self::GroupPollVote(from_cbor(body)?),
            MessageKind::GroupDeliveryReceipt => Self::GroupDeliveryReceipt(from_cbor(body)?),
            MessageKind::GroupSetup => Self::GroupSetup(from_cbor(body)?),
            MessageKind::GroupRename => Self::GroupRename(from_cbor(body)?),
            MessageKind::GroupLeave => Self::GroupLeave(from_cbor(body)?),
            MessageKind::GroupSetProfilePicture => Self::GroupSetProfilePicture(from_cbor(body)?),
            MessageKind::GroupDeleteProfilePicture => {
                Self::GroupDeleteProfilePicture(from_cbor(body)?)
            },
            MessageKind::GroupRequestSync => Self::GroupRequestSync(from_cbor(body)?),
            MessageKind::GroupCallStart => Self::GroupCallStart(from_cbor(body)?),
            MessageKind::Invalid => return Err(ProtocolError::InvalidMessageKind(kind)),
        };

        Ok(content)
    }

    /// Encode the body. Bodiless kinds encode to an empty vector.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Text(inner) => to_cbor(inner),
            Self::Location(inner) => to_cbor(inner),
            Self::File(inner) => to_cbor(inner),
            Self::DeprecatedAudio(inner)
            | Self::DeprecatedImage(inner)
            | Self::DeprecatedVideo(inner) => to_cbor(inner),
            Self::PollSetup(inner) => to_cbor(inner),
            Self::PollVote(inner) => to_cbor(inner),
            Self::DeliveryReceipt(inner) => to_cbor(inner),
            Self::TypingIndicator(inner) => to_cbor(inner),
            Self::ContactSetProfilePicture(inner) => to_cbor(inner),
            Self::ContactDeleteProfilePicture | Self::ContactRequestProfilePicture => {
                Ok(Vec::new())
            },
            Self::CallOffer(inner)
            | Self::CallAnswer(inner)
            | Self::CallIceCandidate(inner)
            | Self::CallHangup(inner)
            | Self::CallRinging(inner) => to_cbor(inner),
            Self::GroupText(inner) => to_cbor(inner),
            Self::GroupLocation(inner) => to_cbor(inner),
            Self::GroupFile(inner) => to_cbor(inner),
            Self::GroupAudio(inner) | Self::GroupImage(inner) | Self::GroupVideo(inner) => {
                to_cbor(inner)
            },
            Self::GroupPollSetup(inner) => to_cbor(inner),
            Self::GroupPollVote(inner) => to_cbor(inner),
            Self::GroupDeliveryReceipt(inner) => to_cbor(inner),
            Self::GroupSetup(inner) => to_cbor(inner),
            Self::GroupRename(inner) => to_cbor(inner),
            Self::GroupSetProfilePicture(inner) => to_cbor(inner),
            Self::GroupCallStart(inner) => to_cbor(inner),
            Self::GroupLeave(group)
            | Self::GroupDeleteProfilePicture(group)
            | Self::GroupRequestSync(group) => to_cbor(group),
        }
    }

    /// Kind of this content.
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Location(_) => MessageKind::Location,
            Self::File(_) => MessageKind::File,
            Self::DeprecatedAudio(_) => MessageKind::DeprecatedAudio,
            Self::DeprecatedImage(_) => MessageKind::DeprecatedImage,
            Self::DeprecatedVideo(_) => MessageKind::DeprecatedVideo,
            Self::PollSetup(_) => MessageKind::PollSetup,
            Self::PollVote(_) => MessageKind::PollVote,
            Self::DeliveryReceipt(_) => MessageKind::DeliveryReceipt,
            Self::TypingIndicator(_) => MessageKind::TypingIndicator,
            Self::ContactSetProfilePicture(_) => MessageKind::ContactSetProfilePicture,
            Self::ContactDeleteProfilePicture => MessageKind::ContactDeleteProfilePicture,
            Self::ContactRequestProfilePicture => MessageKind::ContactRequestProfilePicture,
            Self::CallOffer(_) => MessageKind::CallOffer,
            Self::CallAnswer(_) => MessageKind::CallAnswer,
            Self::CallIceCandidate(_) => MessageKind::CallIceCandidate,
            Self::CallHangup(_) => MessageKind::CallHangup,
            Self::CallRinging(_) => MessageKind::CallRinging,
            Self::GroupText(_) => MessageKind::GroupText,
            Self::GroupLocation(_) => MessageKind::GroupLocation,
            Self::GroupFile(_) => MessageKind::GroupFile,
            Self::GroupAudio(_) => MessageKind::GroupAudio,
            Self::GroupImage(_) => MessageKind::GroupImage,
            Self::GroupVideo(_) => MessageKind::GroupVideo,
            Self::GroupPollSetup(_) => MessageKind::GroupPollSetup,
            Self::GroupPollVote(_) => MessageKind::GroupPollVote,
            Self::GroupDeliveryReceipt(_) => MessageKind::GroupDeliveryReceipt,
            Self::GroupSetup(_) => MessageKind::GroupSetup,
            Self::GroupRename(_) => MessageKind::GroupRename,
            Self::GroupLeave(_) => MessageKind::GroupLeave,
            Self::GroupSetProfilePicture(_) => MessageKind::GroupSetProfilePicture,
            Self::GroupDeleteProfilePicture(_) => MessageKind::GroupDeleteProfilePicture,
            Self::GroupRequestSync(_) => MessageKind::GroupRequestSync,
            Self::GroupCallStart(_) => MessageKind::GroupCallStart,
        }
    }

    /// Group the content is addressed to, if any.
    pub fn group(&self) -> Option<&GroupIdentity> {
        match self {
            Self::GroupText(g) => Some(&g.group),
            Self::GroupLocation(g) => Some(&g.group),
            Self::GroupFile(g) => Some(&g.group),
            Self::GroupAudio(g) | Self::GroupImage(g) | Self::GroupVideo(g) => Some(&g.group),
            Self::GroupPollSetup(g) => Some(&g.group),
            Self::GroupPollVote(g) => Some(&g.group),
            Self::GroupDeliveryReceipt(g) => Some(&g.group),
            Self::GroupSetup(g) => Some(&g.group),
            Self::GroupRename(g) => Some(&g.group),
            Self::GroupSetProfilePicture(g) => Some(&g.group),
            Self::GroupCallStart(g) => Some(&g.group),
            Self::GroupLeave(group)
            | Self::GroupDeleteProfilePicture(group)
            | Self::GroupRequestSync(group) => Some(group),
            Self::Text(_)
            | Self::Location(_)
            | Self::File(_)
            | Self::DeprecatedAudio(_)
            | Self::DeprecatedImage(_)
            | Self::DeprecatedVideo(_)
            | Self::PollSetup(_)
            | Self::PollVote(_)
            | Self::DeliveryReceipt(_)
            | Self::TypingIndicator(_)
            | Self::ContactSetProfilePicture(_)
            | Self::ContactDeleteProfilePicture
            | Self::ContactRequestProfilePicture
            | Self::CallOffer(_)
            | Self::CallAnswer(_)
            | Self::CallIceCandidate(_)
            | Self::CallHangup(_)
            | Self::CallRinging(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> GroupIdentity {
        GroupIdentity { group_id: 42, creator_identity: "CREATOR1".into() }
    }

    #[test]
    fn text_roundtrip() {
        let content = MessageContent::Text(Text { text: "hello".into() });
        let body = content.encode().unwrap();
        assert_eq!(MessageContent::decode(MessageKind::Text, &body).unwrap(), content);
    }

    #[test]
    fn group_content_exposes_group() {
        let content = MessageContent::GroupRename(Grouped {
            group: group(),
            inner: GroupRename { name: "Climbing".into() },
        });
        assert_eq!(content.group(), Some(&group()));
        assert_eq!(content.kind(), MessageKind::GroupRename);
        assert!(content.kind().is_group());

        let leave = MessageContent::GroupLeave(group());
        let body = leave.encode().unwrap();
        assert_eq!(MessageContent::decode(MessageKind::GroupLeave, &body).unwrap(), leave);
    }

    #[test]
    fn bodiless_kinds_ignore_body() {
        let decoded =
            MessageContent::decode(MessageKind::ContactDeleteProfilePicture, &[]).unwrap();
        assert_eq!(decoded, MessageContent::ContactDeleteProfilePicture);
        assert_eq!(decoded.group(), None);
    }

    #[test]
    fn invalid_kind_rejected() {
        assert_eq!(
            MessageContent::decode(MessageKind::Invalid, &[]),
            Err(ProtocolError::InvalidMessageKind(MessageKind::Invalid))
        );
    }

    #[test]
    fn mismatched_body_rejected() {
        let body = MessageContent::Text(Text { text: "x".into() }).encode().unwrap();
        assert!(matches!(
            MessageContent::decode(MessageKind::PollVote, &body),
            Err(ProtocolError::CborDecode(_))
        ));
    }

    #[test]
    fn call_signals_classified() {
        let offer = MessageContent::CallOffer(CallSignal { call_id: 1, payload: vec![1, 2] });
        assert!(offer.kind().is_call_signal());
        assert!(!offer.kind().is_group());
    }
}
