//! In-memory collaborators for simulated devices.
//!
//! [`MemoryStore`] is one device's persistence, call and observer boundary.
//! [`BlobServer`] is shared by every device of a simulation so a picture
//! uploaded on one device can be downloaded on another.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use mdsync_client::{
    AppliedContent, AppliedMessage, ApplyContext, BlobOrigin, BlobStore, CallEvent,
    CallSignalling, Collaborators, EntityId, EntityObserver, MemoryNonceGuard, MessageApplier,
    PictureChange, PictureOwner, StoreError,
};
use mdsync_proto::{
    ConversationId, GroupIdentity, MessageId,
    sync::{Blob, Contact, DistributionListSync, Group, MdmParameters, Settings, UserProfile},
};

/// Delivery state recorded for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// Read at (ms)
    Read(u64),
    /// Sent at (ms)
    Sent(u64),
    /// Delivered at (ms)
    Delivered(u64),
}

#[derive(Debug, Default)]
struct StoreState {
    contacts: BTreeMap<String, Contact>,
    groups: BTreeMap<GroupIdentity, Group>,
    distribution_list_changes: Vec<DistributionListSync>,
    incoming: Vec<AppliedMessage>,
    outgoing: Vec<AppliedMessage>,
    receipts: Vec<(ConversationId, MessageId, Receipt)>,
    profile: UserProfile,
    settings: Settings,
    mdm: Option<MdmParameters>,
    pictures: HashMap<PictureOwner, Bytes>,
    calls: Vec<CallEvent>,
    changed: Vec<EntityId>,
    queue_dry: u32,
    max_device_slots: Option<u32>,
}

impl StoreState {
    fn set_picture(&mut self, owner: PictureOwner, change: Option<PictureChange>) {
        match change {
            Some(PictureChange::Updated(bytes)) => {
                self.pictures.insert(owner, bytes);
            },
            Some(PictureChange::Removed) => {
                self.pictures.remove(&owner);
            },
            None => {},
        }
    }

    fn apply(&mut self, content: AppliedContent) {
        match content {
            AppliedContent::ContactCreated { contact, pictures }
            | AppliedContent::ContactUpdated { contact, pictures } => {
                let identity = contact.identity.clone();
                self.set_picture(
                    PictureOwner::ContactUserDefined(identity.clone()),
                    pictures.user_defined,
                );
                self.set_picture(
                    PictureOwner::ContactDefined(identity.clone()),
                    pictures.contact_defined,
                );
                self.contacts.insert(identity, contact);
            },
            AppliedContent::ContactDeleted { identity, settings, profile } => {
                self.contacts.remove(&identity);
                if let Some(settings) = settings {
                    self.settings = settings;
                }
                if let Some(profile) = profile {
                    self.profile = profile;
                }
            },
            AppliedContent::GroupCreated { group, picture }
            | AppliedContent::GroupUpdated { group, picture } => {
                self.set_picture(PictureOwner::Group(group.group_identity.clone()), picture);
                self.groups.insert(group.group_identity.clone(), group);
            },
            AppliedContent::GroupDeleted { group_identity } => {
                self.groups.remove(&group_identity);
            },
            AppliedContent::DistributionList(change) => self.distribution_list_changes.push(change),
            AppliedContent::IncomingMessage(message) => self.incoming.push(message),
            AppliedContent::OutgoingMessage(message) => self.outgoing.push(message),
            AppliedContent::UserProfile { profile, picture } => {
                self.set_picture(PictureOwner::User, picture);
                self.profile = profile;
            },
            AppliedContent::Settings(settings) => self.settings = settings,
            AppliedContent::MdmParameters(parameters) => self.mdm = Some(parameters),
        }
    }
}

/// One device's local state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Collaborators backed by this store and a shared blob server.
    pub fn collaborators(self: &Arc<Self>, blobs: &BlobServer) -> Collaborators {
        Collaborators {
            applier: Arc::clone(self) as Arc<dyn MessageApplier>,
            blobs: Arc::new(blobs.clone()),
            calls: Arc::clone(self) as Arc<dyn CallSignalling>,
            observer: Arc::clone(self) as Arc<dyn EntityObserver>,
            nonces: Arc::new(MemoryNonceGuard::new()),
        }
    }

    /// Store a contact created on this device.
    pub fn insert_contact(&self, contact: Contact) {
        self.state().contacts.insert(contact.identity.clone(), contact);
    }

    /// Remove a contact locally.
    pub fn remove_contact(&self, identity: &str) {
        self.state().contacts.remove(identity);
    }

    /// Store a picture locally.
    pub fn insert_picture(&self, owner: PictureOwner, bytes: Bytes) {
        self.state().pictures.insert(owner, bytes);
    }

    /// Stored contacts ordered by identity.
    pub fn contacts(&self) -> Vec<Contact> {
        self.state().contacts.values().cloned().collect()
    }

    /// Stored contact.
    pub fn contact_snapshot(&self, identity: &str) -> Option<Contact> {
        self.state().contacts.get(identity).cloned()
    }

    /// Stored groups.
    pub fn groups(&self) -> Vec<Group> {
        self.state().groups.values().cloned().collect()
    }

    /// Messages received on other devices.
    pub fn incoming_messages(&self) -> Vec<AppliedMessage> {
        self.state().incoming.clone()
    }

    /// Messages sent from other devices.
    pub fn outgoing_messages(&self) -> Vec<AppliedMessage> {
        self.state().outgoing.clone()
    }

    /// Recorded receipts.
    pub fn receipts(&self) -> Vec<(ConversationId, MessageId, Receipt)> {
        self.state().receipts.clone()
    }

    /// Stored user profile.
    pub fn profile(&self) -> UserProfile {
        self.state().profile.clone()
    }

    /// Stored picture.
    pub fn picture_snapshot(&self, owner: &PictureOwner) -> Option<Bytes> {
        self.state().pictures.get(owner).cloned()
    }

    /// Distribution list changes applied.
    pub fn distribution_list_changes(&self) -> Vec<DistributionListSync> {
        self.state().distribution_list_changes.clone()
    }

    /// Stored MDM parameters.
    pub fn mdm_parameters(&self) -> Option<MdmParameters> {
        self.state().mdm.clone()
    }

    /// Call signals handed off.
    pub fn calls(&self) -> Vec<CallEvent> {
        self.state().calls.clone()
    }

    /// Entities reported as changed, in order.
    pub fn changed_entities(&self) -> Vec<EntityId> {
        self.state().changed.clone()
    }

    /// Times the reflection queue ran dry.
    pub fn queue_dry_count(&self) -> u32 {
        self.state().queue_dry
    }

    /// Device slots reported when multi-device was enabled.
    pub fn max_device_slots(&self) -> Option<u32> {
        self.state().max_device_slots
    }

    fn record_receipt(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        receipt: Receipt,
    ) {
        self.state().receipts.push((conversation.clone(), message_id, receipt));
    }
}

#[async_trait]
impl MessageApplier for MemoryStore {
    async fn save(&self, content: AppliedContent, context: ApplyContext) -> Result<(), StoreError> {
        tracing::trace!(device_id = context.device_id, "saving reflected content");
        self.state().apply(content);
        Ok(())
    }

    async fn contact(&self, identity: &str) -> Result<Option<Contact>, StoreError> {
        Ok(self.contact_snapshot(identity))
    }

    async fn group(&self, group_identity: &GroupIdentity) -> Result<Option<Group>, StoreError> {
        Ok(self.state().groups.get(group_identity).cloned())
    }

    async fn existing_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<bool, StoreError> {
        let state = self.state();
        Ok(match conversation {
            ConversationId::Contact(identity) => state.contacts.contains_key(identity),
            ConversationId::Group(group_identity) => state.groups.contains_key(group_identity),
            ConversationId::DistributionList(_) => false,
        })
    }

    async fn user_profile(&self) -> Result<UserProfile, StoreError> {
        Ok(self.profile())
    }

    async fn settings(&self) -> Result<Settings, StoreError> {
        Ok(self.state().settings.clone())
    }

    async fn picture(&self, owner: &PictureOwner) -> Result<Option<Bytes>, StoreError> {
        Ok(self.picture_snapshot(owner))
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        read_at: u64,
    ) -> Result<(), StoreError> {
        self.record_receipt(conversation, message_id, Receipt::Read(read_at));
        Ok(())
    }

    async fn mark_sent(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        sent_at: u64,
    ) -> Result<(), StoreError> {
        self.record_receipt(conversation, message_id, Receipt::Sent(sent_at));
        Ok(())
    }

    async fn mark_delivered(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        delivered_at: u64,
    ) -> Result<(), StoreError> {
        self.record_receipt(conversation, message_id, Receipt::Delivered(delivered_at));
        Ok(())
    }
}

#[async_trait]
impl CallSignalling for MemoryStore {
    async fn hand_off(&self, event: CallEvent) {
        self.state().calls.push(event);
    }
}

impl EntityObserver for MemoryStore {
    fn on_entity_changed(&self, entity: &EntityId) {
        self.state().changed.push(entity.clone());
    }

    fn on_reflection_queue_dry(&self) {
        self.state().queue_dry += 1;
    }

    fn on_multi_device_enabled(&self, max_device_slots: u32) {
        self.state().max_device_slots = Some(max_device_slots);
    }
}

#[derive(Debug, Default)]
struct BlobServerState {
    blobs: HashMap<[u8; 16], (Bytes, [u8; 32])>,
    next_id: u64,
}

/// Blob server shared by the devices of a simulation.
///
/// Blobs are stored in the clear together with the key they were uploaded
/// under; a download with another key finds nothing.
#[derive(Debug, Clone, Default)]
pub struct BlobServer {
    inner: Arc<Mutex<BlobServerState>>,
}

impl BlobServer {
    /// Empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored blobs.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).blobs.len()
    }

    /// No blob stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for BlobServer {
    async fn download(
        &self,
        blob_id: [u8; 16],
        key: [u8; 32],
        _origin: BlobOrigin,
    ) -> Result<Option<Bytes>, StoreError> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .blobs
            .get(&blob_id)
            .filter(|(_, stored_key)| *stored_key == key)
            .map(|(data, _)| data.clone()))
    }

    async fn upload(&self, data: Bytes, _origin: BlobOrigin) -> Result<Blob, StoreError> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;

        let mut id = [0u8; 16];
        id[8..].copy_from_slice(&state.next_id.to_be_bytes());
        let mut key = [0u8; 32];
        key[..8].copy_from_slice(&state.next_id.to_le_bytes());

        state.blobs.insert(id, (data, key));
        Ok(Blob { id, nonce: None, key, uploaded_at: None })
    }
}

#[cfg(test)]
mod tests {
    use mdsync_client::ContactPictures;

    use super::*;

    fn context() -> ApplyContext {
        ApplyContext { device_id: 2, reflected_at: 0 }
    }

    #[tokio::test]
    async fn contact_lifecycle() {
        let store = MemoryStore::new();
        let mut contact = Contact::new("ECHOECHO");
        contact.first_name = Some("Ada".into());

        store
            .save(
                AppliedContent::ContactCreated {
                    contact: contact.clone(),
                    pictures: ContactPictures {
                        user_defined: Some(PictureChange::Updated(Bytes::from_static(b"jpeg"))),
                        contact_defined: None,
                    },
                },
                context(),
            )
            .await
            .unwrap();
        assert_eq!(store.contact("ECHOECHO").await.unwrap(), Some(contact));
        assert!(
            store
                .existing_conversation(&ConversationId::Contact("ECHOECHO".into()))
                .await
                .unwrap()
        );
        assert_eq!(
            store.picture_snapshot(&PictureOwner::ContactUserDefined("ECHOECHO".into())),
            Some(Bytes::from_static(b"jpeg"))
        );

        store
            .save(
                AppliedContent::ContactDeleted {
                    identity: "ECHOECHO".into(),
                    settings: None,
                    profile: None,
                },
                context(),
            )
            .await
            .unwrap();
        assert!(store.contacts().is_empty());
    }

    #[tokio::test]
    async fn blob_needs_matching_key() {
        let server = BlobServer::new();
        let blob = server.upload(Bytes::from_static(b"png"), BlobOrigin::Local).await.unwrap();

        let found = server.download(blob.id, blob.key, BlobOrigin::Local).await.unwrap();
        assert_eq!(found, Some(Bytes::from_static(b"png")));
        assert_eq!(server.download(blob.id, [0; 32], BlobOrigin::Local).await.unwrap(), None);
        assert_eq!(server.len(), 1);
    }

    #[tokio::test]
    async fn receipts_keep_order() {
        let store = MemoryStore::new();
        let conversation = ConversationId::Contact("ECHOECHO".into());
        store.mark_sent(&conversation, MessageId(7), 10).await.unwrap();
        store.mark_read(&conversation, MessageId(7), 20).await.unwrap();

        let kinds: Vec<Receipt> = store.receipts().into_iter().map(|(_, _, r)| r).collect();
        assert_eq!(kinds, vec![Receipt::Sent(10), Receipt::Read(20)]);
    }
}
