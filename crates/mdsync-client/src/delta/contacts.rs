//! Pending contact changes.

use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use mdsync_core::Environment;
use mdsync_proto::sync::{
    AcquaintanceLevel, ActivityState, Contact, ContactSyncState, ConversationCategory,
    ConversationVisibility, IdentityType, VerificationLevel,
};

use super::{PictureMarker, SyncAction, run_chunks};
use crate::{
    boundary::Collaborators,
    config::DeltaSyncConfig,
    error::SyncError,
    outbound::{self, MediatorLink},
};

/// Changed fields of one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactDelta {
    /// Contact identity
    pub identity: String,
    action: SyncAction,
    /// Changed fields; picture fields are unused
    pub fields: Contact,
    /// Picture set by the user
    pub user_defined_picture: PictureMarker,
    /// Picture distributed by the contact
    pub contact_defined_picture: PictureMarker,
}

impl ContactDelta {
    /// Empty update for `identity`.
    pub fn new(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self {
            fields: Contact::new(identity.clone()),
            identity,
            action: SyncAction::Update,
            user_defined_picture: PictureMarker::Unchanged,
            contact_defined_picture: PictureMarker::Unchanged,
        }
    }

    /// Create or update. Once a create, always a create.
    pub fn action(&self) -> SyncAction {
        self.action
    }
}

/// Accumulates contact changes until the next sync.
///
/// Setters never suspend. `sync()` snapshots the pending deltas and releases
/// the lock before any network I/O.
#[derive(Debug, Default)]
pub struct ContactDeltaAccumulator {
    deltas: Mutex<BTreeMap<String, ContactDelta>>,
    config: DeltaSyncConfig,
}

impl ContactDeltaAccumulator {
    /// Empty accumulator.
    pub fn new(config: DeltaSyncConfig) -> Self {
        Self { deltas: Mutex::new(BTreeMap::new()), config }
    }

    /// Mutate the delta for `identity`, creating it if needed.
    ///
    /// A delta marked as a create stays one whatever `change` does.
    pub fn update(&self, identity: &str, change: impl FnOnce(&mut ContactDelta)) {
        let mut deltas = self.deltas.lock().unwrap_or_else(PoisonError::into_inner);
        let delta =
            deltas.entry(identity.to_owned()).or_insert_with(|| ContactDelta::new(identity));
        let created = delta.action == SyncAction::Create;
        change(delta);
        if created {
            delta.action = SyncAction::Create;
        }
    }

    /// Record a newly added contact. Later edits keep it a create.
    pub fn mark_added(&self, identity: &str) {
        self.update(identity, |delta| delta.action = SyncAction::Create);
    }

    /// Record a first name change.
    pub fn update_first_name(&self, identity: &str, first_name: impl Into<String>) {
        let first_name = first_name.into();
        self.update(identity, |delta| delta.fields.first_name = Some(first_name));
    }

    /// Record a last name change.
    pub fn update_last_name(&self, identity: &str, last_name: impl Into<String>) {
        let last_name = last_name.into();
        self.update(identity, |delta| delta.fields.last_name = Some(last_name));
    }

    /// Record a nickname change.
    pub fn update_nickname(&self, identity: &str, nickname: impl Into<String>) {
        let nickname = nickname.into();
        self.update(identity, |delta| delta.fields.nickname = Some(nickname));
    }

    /// Record a verification level change.
    pub fn update_verification_level(&self, identity: &str, level: VerificationLevel) {
        self.update(identity, |delta| delta.fields.verification_level = Some(level));
    }

    /// Record an identity type change.
    pub fn update_identity_type(&self, identity: &str, identity_type: IdentityType) {
        self.update(identity, |delta| delta.fields.identity_type = Some(identity_type));
    }

    /// Record an acquaintance level change.
    pub fn update_acquaintance_level(&self, identity: &str, level: AcquaintanceLevel) {
        self.update(identity, |delta| delta.fields.acquaintance_level = Some(level));
    }

    /// Record an activity state change.
    pub fn update_activity_state(&self, identity: &str, state: ActivityState) {
        self.update(identity, |delta| delta.fields.activity_state = Some(state));
    }

    /// Record a sync state change.
    pub fn update_sync_state(&self, identity: &str, state: ContactSyncState) {
        self.update(identity, |delta| delta.fields.sync_state = Some(state));
    }

    /// Record a conversation category change.
    pub fn update_conversation_category(&self, identity: &str, category: ConversationCategory) {
        self.update(identity, |delta| delta.fields.conversation_category = Some(category));
    }

    /// Record a conversation visibility change.
    pub fn update_conversation_visibility(
        &self,
        identity: &str,
        visibility: ConversationVisibility,
    ) {
        self.update(identity, |delta| delta.fields.conversation_visibility = Some(visibility));
    }

    /// Record a change of the picture the user set on the contact.
    pub fn update_user_defined_picture(&self, identity: &str, marker: PictureMarker) {
        self.update(identity, |delta| delta.user_defined_picture = marker);
    }

    /// Record a change of the picture the contact distributed.
    pub fn update_contact_defined_picture(&self, identity: &str, marker: PictureMarker) {
        self.update(identity, |delta| delta.contact_defined_picture = marker);
    }

    /// Pending delta for `identity`.
    pub fn pending(&self, identity: &str) -> Option<ContactDelta> {
        self.deltas.lock().unwrap_or_else(PoisonError::into_inner).get(identity).cloned()
    }

    /// Number of pending deltas.
    pub fn len(&self) -> usize {
        self.deltas.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// No pending deltas.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reflect every pending delta.
    ///
    /// Deltas are removed only if all chunks succeeded and the delta was not
    /// edited while the sync ran.
    ///
    /// # Errors
    ///
    /// The first failed chunk, or `Timeout` after `chunk_timeout × chunks`.
    pub async fn sync<E, L>(
        &self,
        env: &E,
        link: &L,
        collaborators: &Collaborators,
    ) -> Result<(), SyncError>
    where
        E: Environment,
        L: MediatorLink + Clone + 'static,
    {
        let snapshot: Vec<ContactDelta> = {
            let deltas = self.deltas.lock().unwrap_or_else(PoisonError::into_inner);
            deltas.values().cloned().collect()
        };
        if snapshot.is_empty() {
            return Ok(());
        }

        run_chunks(env, self.config, &snapshot, |chunk| {
            let link = link.clone();
            let collaborators = collaborators.clone();
            async move { outbound::sync_contacts(&link, &collaborators, chunk).await }
        })
        .await?;

        let mut deltas = self.deltas.lock().unwrap_or_else(PoisonError::into_inner);
        for synced in snapshot {
            if deltas.get(&synced.identity) == Some(&synced) {
                deltas.remove(&synced.identity);
            }
        }
        tracing::info!(remaining = deltas.len(), "contact sync complete");

        Ok(())
    }

    /// Reflect a contact delete right away. Any pending delta for the
    /// contact is dropped.
    ///
    /// # Errors
    ///
    /// The transaction error, or `Timeout` after one `chunk_timeout`.
    pub async fn delete_and_sync<E, L>(
        &self,
        env: &E,
        link: &L,
        identity: &str,
    ) -> Result<(), SyncError>
    where
        E: Environment,
        L: MediatorLink + Clone + 'static,
    {
        self.deltas.lock().unwrap_or_else(PoisonError::into_inner).remove(identity);

        run_chunks(env, self.config, &[identity.to_owned()], |identities| {
            let link = link.clone();
            async move { outbound::delete_contacts(&link, identities).await }
        })
        .await
    }
}
