//! Collaborator interfaces.
//!
//! The runtime owns no durable state. Everything that outlives a connection
//! (contacts, groups, messages, settings, blobs) is reached through these
//! traits and addressed by identifiers, never by object references.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mdsync_core::NonceGuard;
use mdsync_proto::{
    ConversationId, GroupIdentity, MessageContent, MessageId,
    content::{CallSignal, GroupCallStart, Grouped},
    sync::{
        Blob, Contact, DistributionListSync, Group, MdmParameters, Settings, UserProfile,
    },
};

use crate::error::StoreError;

/// Entity whose state changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    /// Contact by identity
    Contact(String),
    /// Group
    Group(GroupIdentity),
    /// Distribution list
    DistributionList(u64),
    /// Conversation
    Conversation(ConversationId),
    /// The user's own profile
    UserProfile,
    /// Device settings
    Settings,
}

/// Change to a stored picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PictureChange {
    /// Picture removed
    Removed,
    /// New picture bytes
    Updated(Bytes),
}

/// Pictures of a contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPictures {
    /// Picture set by the user on this contact
    pub user_defined: Option<PictureChange>,
    /// Picture distributed by the contact
    pub contact_defined: Option<PictureChange>,
}

/// Which stored picture to read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PictureOwner {
    /// Picture set by the user on a contact
    ContactUserDefined(String),
    /// Picture distributed by a contact
    ContactDefined(String),
    /// Group picture
    Group(GroupIdentity),
    /// The user's own picture
    User,
}

/// Blob namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOrigin {
    /// Visible to the device group only
    Local,
    /// Visible to message recipients
    Public,
}

/// Message as it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMessage {
    /// Conversation the message belongs to
    pub conversation: ConversationId,
    /// Author, `None` for messages sent by this user
    pub sender: Option<String>,
    /// Message id
    pub message_id: MessageId,
    /// Thread the message replies to
    pub thread_message_id: Option<MessageId>,
    /// Creation time (ms)
    pub created_at: u64,
    /// Decoded content
    pub content: MessageContent,
    /// Downloaded thumbnail or picture, if the content references one
    pub attachment: Option<Bytes>,
}

/// Validated content handed to persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedContent {
    /// New contact
    ContactCreated {
        /// Full record
        contact: Contact,
        /// Downloaded pictures
        pictures: ContactPictures,
    },
    /// Existing contact changed
    ContactUpdated {
        /// Merged record
        contact: Contact,
        /// Downloaded pictures
        pictures: ContactPictures,
    },
    /// Contact removed, together with the lists that referenced it.
    ///
    /// Persisted as one unit so a failure leaves the contact in place.
    ContactDeleted {
        /// Identity
        identity: String,
        /// Settings with the identity dropped from the block list, if it was there
        settings: Option<Settings>,
        /// Profile with the identity dropped from the picture share list, if it was there
        profile: Option<UserProfile>,
    },
    /// New group
    GroupCreated {
        /// Full record
        group: Group,
        /// Downloaded picture
        picture: Option<PictureChange>,
    },
    /// Existing group changed
    GroupUpdated {
        /// Merged record
        group: Group,
        /// Downloaded picture
        picture: Option<PictureChange>,
    },
    /// Group dissolved
    GroupDeleted {
        /// Group
        group_identity: GroupIdentity,
    },
    /// Distribution list change
    DistributionList(DistributionListSync),
    /// Message received on another device
    IncomingMessage(AppliedMessage),
    /// Message sent from another device
    OutgoingMessage(AppliedMessage),
    /// Profile change
    UserProfile {
        /// Merged profile
        profile: UserProfile,
        /// Downloaded picture
        picture: Option<PictureChange>,
    },
    /// Settings change
    Settings(Settings),
    /// MDM parameter change
    MdmParameters(MdmParameters),
}

/// Metadata of the reflected envelope being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyContext {
    /// Device that reflected the envelope
    pub device_id: u64,
    /// Mediator timestamp of the reflection (ms)
    pub reflected_at: u64,
}

/// Persistence boundary.
#[async_trait]
pub trait MessageApplier: Send + Sync {
    /// Persist validated content.
    async fn save(&self, content: AppliedContent, context: ApplyContext) -> Result<(), StoreError>;

    /// Stored contact.
    async fn contact(&self, identity: &str) -> Result<Option<Contact>, StoreError>;

    /// Stored group.
    async fn group(&self, group_identity: &GroupIdentity) -> Result<Option<Group>, StoreError>;

    /// Conversation exists locally.
    async fn existing_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<bool, StoreError>;

    /// Stored user profile.
    async fn user_profile(&self) -> Result<UserProfile, StoreError>;

    /// Stored settings.
    async fn settings(&self) -> Result<Settings, StoreError>;

    /// Stored picture bytes.
    async fn picture(&self, owner: &PictureOwner) -> Result<Option<Bytes>, StoreError>;

    /// Mark a message read.
    async fn mark_read(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        read_at: u64,
    ) -> Result<(), StoreError>;

    /// Mark an outgoing message sent.
    async fn mark_sent(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        sent_at: u64,
    ) -> Result<(), StoreError>;

    /// Mark an outgoing message delivered.
    async fn mark_delivered(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        delivered_at: u64,
    ) -> Result<(), StoreError>;
}

/// Blob storage boundary.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download and decrypt a blob. `None` if the blob does not exist.
    async fn download(
        &self,
        blob_id: [u8; 16],
        key: [u8; 32],
        origin: BlobOrigin,
    ) -> Result<Option<Bytes>, StoreError>;

    /// Encrypt and upload bytes.
    async fn upload(&self, data: Bytes, origin: BlobOrigin) -> Result<Blob, StoreError>;
}

/// Call content carried by a reflected message.
#[derive(Debug, Clone, PartialEq)]
pub enum CallPayload {
    /// One-to-one signal (offer, answer, candidates, ringing, hangup)
    Signal(CallSignal),
    /// Group call announcement. Handed off after the message is persisted.
    GroupCallStart(Grouped<GroupCallStart>),
}

/// Call event from a reflected message.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    /// Contact conversation for signals, group conversation for group calls
    pub conversation: ConversationId,
    /// Sender of an incoming message. `None` when this user sent it from
    /// another device.
    pub sender: Option<String>,
    /// Message kind
    pub kind: mdsync_proto::MessageKind,
    /// Call content
    pub payload: CallPayload,
}

impl CallEvent {
    /// The message was sent by this user on another device.
    pub fn is_outgoing(&self) -> bool {
        self.sender.is_none()
    }
}

/// Call boundary.
#[async_trait]
pub trait CallSignalling: Send + Sync {
    /// Forward a call signal.
    async fn hand_off(&self, event: CallEvent);
}

/// Upward notifications. Every method defaults to a no-op.
pub trait EntityObserver: Send + Sync {
    /// An entity changed.
    fn on_entity_changed(&self, _entity: &EntityId) {}

    /// The mediator delivered every queued reflected envelope.
    fn on_reflection_queue_dry(&self) {}

    /// Processing of an incoming message started.
    fn on_incoming_message_started(&self, _message_id: MessageId) {}

    /// Processing of an incoming message finished.
    fn on_incoming_message_finished(&self, _message_id: MessageId) {}

    /// Multi-device was enabled by the handshake.
    fn on_multi_device_enabled(&self, _max_device_slots: u32) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl EntityObserver for NoopObserver {}

/// Collaborators shared by the dispatcher and the outbound tasks.
#[derive(Clone)]
pub struct Collaborators {
    /// Persistence
    pub applier: Arc<dyn MessageApplier>,
    /// Blob storage
    pub blobs: Arc<dyn BlobStore>,
    /// Calls
    pub calls: Arc<dyn CallSignalling>,
    /// Notifications
    pub observer: Arc<dyn EntityObserver>,
    /// Replay protection
    pub nonces: Arc<dyn NonceGuard>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
