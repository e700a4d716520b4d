//! Pending group changes.

use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use mdsync_core::Environment;
use mdsync_proto::{
    GroupIdentity,
    sync::{ConversationCategory, ConversationVisibility, Group, GroupUserState},
};

use super::{PictureMarker, run_chunks};
use crate::{
    boundary::Collaborators,
    config::DeltaSyncConfig,
    error::SyncError,
    outbound::{self, MediatorLink},
};

/// Changed fields of one group. Groups always sync as updates; the picture
/// travels next to the fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDelta {
    /// Changed fields; `profile_picture` is unused
    pub fields: Group,
    /// Picture change
    pub picture: PictureMarker,
}

impl GroupDelta {
    /// Empty delta.
    pub fn new(group_identity: GroupIdentity) -> Self {
        Self { fields: Group::new(group_identity), picture: PictureMarker::Unchanged }
    }

    /// Group the delta belongs to.
    pub fn group_identity(&self) -> &GroupIdentity {
        &self.fields.group_identity
    }
}

/// Accumulates group changes until the next sync.
#[derive(Debug, Default)]
pub struct GroupDeltaAccumulator {
    deltas: Mutex<BTreeMap<GroupIdentity, GroupDelta>>,
    config: DeltaSyncConfig,
}

impl GroupDeltaAccumulator {
    /// Empty accumulator.
    pub fn new(config: DeltaSyncConfig) -> Self {
        Self { deltas: Mutex::new(BTreeMap::new()), config }
    }

    /// Mutate the delta for `group_identity`, creating it if needed.
    pub fn update(&self, group_identity: &GroupIdentity, change: impl FnOnce(&mut GroupDelta)) {
        let mut deltas = self.deltas.lock().unwrap_or_else(PoisonError::into_inner);
        let delta = deltas
            .entry(group_identity.clone())
            .or_insert_with(|| GroupDelta::new(group_identity.clone()));
        change(delta);
    }

    /// Record a rename.
    pub fn update_name(&self, group_identity: &GroupIdentity, name: impl Into<String>) {
        let name = name.into();
        self.update(group_identity, |delta| delta.fields.name = Some(name));
    }

    /// Record a new member list.
    pub fn update_members(&self, group_identity: &GroupIdentity, members: Vec<String>) {
        self.update(group_identity, |delta| delta.fields.member_identities = Some(members));
    }

    /// Record a membership change of the user.
    pub fn update_user_state(&self, group_identity: &GroupIdentity, state: GroupUserState) {
        self.update(group_identity, |delta| delta.fields.user_state = Some(state));
    }

    /// Record a conversation category change.
    pub fn update_conversation_category(
        &self,
        group_identity: &GroupIdentity,
        category: ConversationCategory,
    ) {
        self.update(group_identity, |delta| delta.fields.conversation_category = Some(category));
    }

    /// Record a conversation visibility change.
    pub fn update_conversation_visibility(
        &self,
        group_identity: &GroupIdentity,
        visibility: ConversationVisibility,
    ) {
        self.update(group_identity, |delta| {
            delta.fields.conversation_visibility = Some(visibility);
        });
    }

    /// Record a picture change.
    pub fn update_picture(&self, group_identity: &GroupIdentity, marker: PictureMarker) {
        self.update(group_identity, |delta| delta.picture = marker);
    }

    /// Pending delta for `group_identity`.
    pub fn pending(&self, group_identity: &GroupIdentity) -> Option<GroupDelta> {
        self.deltas.lock().unwrap_or_else(PoisonError::into_inner).get(group_identity).cloned()
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
        let snapshot: Vec<GroupDelta> = {
            let deltas = self.deltas.lock().unwrap_or_else(PoisonError::into_inner);
            deltas.values().cloned().collect()
        };
        if snapshot.is_empty() {
            return Ok(());
        }

        run_chunks(env, self.config, &snapshot, |chunk| {
            let link = link.clone();
            let collaborators = collaborators.clone();
            async move { outbound::sync_groups(&link, &collaborators, chunk).await }
        })
        .await?;

        let mut deltas = self.deltas.lock().unwrap_or_else(PoisonError::into_inner);
        for synced in snapshot {
            if deltas.get(synced.group_identity()) == Some(&synced) {
                deltas.remove(synced.group_identity());
            }
        }
        tracing::info!(remaining = deltas.len(), "group sync complete");

        Ok(())
    }
}
