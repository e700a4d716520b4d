//! Outbound sync tasks.
//!
//! Each task builds envelope content for a local change and reflects it
//! through a [`MediatorLink`]. Changes to shared state (contacts, groups,
//! profile, settings) run inside a transaction; message reflections do not.
//!
//! Pictures are uploaded before the transaction begins so the lock is held
//! only for the reflects.

use async_trait::async_trait;
use mdsync_proto::{
    EnvelopeContent, ReflectId,
    messages::{
        IncomingMessage, IncomingMessageRead, IncomingMessageUpdate, OutgoingMessage,
        OutgoingMessageSent, OutgoingMessageUpdate,
    },
    payloads::transaction::TransactionScope,
    sync::{
        ContactSync, DeltaImage, GroupSync, Settings, SettingsSync, UserProfile, UserProfileSync,
    },
};

use crate::{
    boundary::{BlobOrigin, Collaborators, PictureOwner},
    delta::{PictureMarker, SyncAction, contacts::ContactDelta, groups::GroupDelta},
    error::SyncError,
    handlers::contact,
};

/// Operations of an established mediator link used by sync tasks.
#[async_trait]
pub trait MediatorLink: Send + Sync {
    /// Acquire the transaction lock for `scope`. Returns once `LockAck`
    /// arrived.
    async fn begin_transaction(&self, scope: TransactionScope) -> Result<(), SyncError>;

    /// Release the held lock. Returns once `UnlockAck` arrived.
    async fn commit_transaction(&self) -> Result<(), SyncError>;

    /// Release the held lock without waiting. Used when guarded work was
    /// abandoned.
    fn release_transaction(&self);

    /// Reflect `content` to the other devices. Returns once `ReflectAck`
    /// arrived.
    async fn reflect(&self, content: EnvelopeContent) -> Result<ReflectId, SyncError>;
}

/// Held transaction lock. Dropping it without [`commit`](Self::commit)
/// releases the lock in the background.
struct Transaction<'a, L: MediatorLink + ?Sized> {
    link: &'a L,
    held: bool,
}

impl<'a, L: MediatorLink + ?Sized> Transaction<'a, L> {
    async fn begin(link: &'a L, scope: TransactionScope) -> Result<Self, SyncError> {
        link.begin_transaction(scope).await?;
        Ok(Self { link, held: true })
    }

    async fn commit(mut self) -> Result<(), SyncError> {
        self.held = false;
        self.link.commit_transaction().await
    }
}

impl<L: MediatorLink + ?Sized> Drop for Transaction<'_, L> {
    fn drop(&mut self) {
        if self.held {
            tracing::warn!("transaction abandoned, releasing lock");
            self.link.release_transaction();
        }
    }
}

/// Reflect contact deltas in one transaction.
///
/// Deltas for contacts deleted locally since they were recorded are dropped
/// once the lock is held.
pub async fn sync_contacts<L: MediatorLink + ?Sized>(
    link: &L,
    collaborators: &Collaborators,
    deltas: Vec<ContactDelta>,
) -> Result<(), SyncError> {
    let mut prepared = Vec::with_capacity(deltas.len());
    for delta in deltas {
        let action = delta.action();
        let mut fields = delta.fields;
        fields.user_defined_profile_picture = upload_picture(
            collaborators,
            delta.user_defined_picture,
            PictureOwner::ContactUserDefined(delta.identity.clone()),
            BlobOrigin::Local,
        )
        .await?;
        fields.contact_defined_profile_picture = upload_picture(
            collaborators,
            delta.contact_defined_picture,
            PictureOwner::ContactDefined(delta.identity.clone()),
            BlobOrigin::Local,
        )
        .await?;
        prepared.push((action, fields));
    }

    let transaction = Transaction::begin(link, TransactionScope::ContactSync).await?;
    for (action, fields) in prepared {
        let Some(persisted) = collaborators.applier.contact(&fields.identity).await? else {
            tracing::debug!(identity = %fields.identity, "contact deleted locally, dropping delta");
            continue;
        };

        let sync = match action {
            SyncAction::Create => ContactSync::Create(contact::merge(persisted, fields)),
            SyncAction::Update => ContactSync::Update(fields),
        };
        link.reflect(EnvelopeContent::ContactSync(sync)).await?;
    }
    transaction.commit().await
}

/// Reflect contact deletes in one transaction.
pub async fn delete_contacts<L: MediatorLink + ?Sized>(
    link: &L,
    identities: Vec<String>,
) -> Result<(), SyncError> {
    let transaction = Transaction::begin(link, TransactionScope::ContactSync).await?;
    for identity in identities {
        link.reflect(EnvelopeContent::ContactSync(ContactSync::Delete { identity })).await?;
    }
    transaction.commit().await
}

/// Reflect group deltas in one transaction.
pub async fn sync_groups<L: MediatorLink + ?Sized>(
    link: &L,
    collaborators: &Collaborators,
    deltas: Vec<GroupDelta>,
) -> Result<(), SyncError> {
    let mut prepared = Vec::with_capacity(deltas.len());
    for delta in deltas {
        let mut fields = delta.fields;
        fields.profile_picture = upload_picture(
            collaborators,
            delta.picture,
            PictureOwner::Group(fields.group_identity.clone()),
            BlobOrigin::Local,
        )
        .await?;
        prepared.push(fields);
    }

    let transaction = Transaction::begin(link, TransactionScope::GroupSync).await?;
    for fields in prepared {
        if collaborators.applier.group(&fields.group_identity).await?.is_none() {
            let group = &fields.group_identity;
            tracing::debug!(%group, "group deleted locally, dropping delta");
            continue;
        }
        link.reflect(EnvelopeContent::GroupSync(GroupSync::Update(fields))).await?;
    }
    transaction.commit().await
}

/// Reflect a profile change.
pub async fn sync_user_profile<L: MediatorLink + ?Sized>(
    link: &L,
    collaborators: &Collaborators,
    mut profile: UserProfile,
    picture: PictureMarker,
) -> Result<(), SyncError> {
    profile.profile_picture =
        upload_picture(collaborators, picture, PictureOwner::User, BlobOrigin::Local).await?;

    let transaction = Transaction::begin(link, TransactionScope::UserProfileSync).await?;
    link.reflect(EnvelopeContent::UserProfileSync(UserProfileSync::Update(profile))).await?;
    transaction.commit().await
}

/// Reflect a settings change.
pub async fn sync_settings<L: MediatorLink + ?Sized>(
    link: &L,
    settings: Settings,
) -> Result<(), SyncError> {
    let transaction = Transaction::begin(link, TransactionScope::SettingsSync).await?;
    link.reflect(EnvelopeContent::SettingsSync(SettingsSync::Update(settings))).await?;
    transaction.commit().await
}

/// Reflect a message this device received.
pub async fn reflect_incoming_message<L: MediatorLink + ?Sized>(
    link: &L,
    message: IncomingMessage,
) -> Result<ReflectId, SyncError> {
    link.reflect(EnvelopeContent::IncomingMessage(message)).await
}

/// Reflect a message this device is about to send.
pub async fn reflect_outgoing_message<L: MediatorLink + ?Sized>(
    link: &L,
    message: OutgoingMessage,
) -> Result<ReflectId, SyncError> {
    link.reflect(EnvelopeContent::OutgoingMessage(message)).await
}

/// Reflect that messages were sent.
pub async fn reflect_outgoing_sent<L: MediatorLink + ?Sized>(
    link: &L,
    updates: Vec<OutgoingMessageSent>,
) -> Result<ReflectId, SyncError> {
    link.reflect(EnvelopeContent::OutgoingMessageUpdate(OutgoingMessageUpdate { updates })).await
}

/// Reflect that received messages were read.
pub async fn reflect_incoming_read<L: MediatorLink + ?Sized>(
    link: &L,
    updates: Vec<IncomingMessageRead>,
) -> Result<ReflectId, SyncError> {
    link.reflect(EnvelopeContent::IncomingMessageUpdate(IncomingMessageUpdate { updates })).await
}

async fn upload_picture(
    collaborators: &Collaborators,
    marker: PictureMarker,
    owner: PictureOwner,
    origin: BlobOrigin,
) -> Result<Option<DeltaImage>, SyncError> {
    match marker {
        PictureMarker::Unchanged => Ok(None),
        PictureMarker::Removed => Ok(Some(DeltaImage::Removed)),
        PictureMarker::Updated => match collaborators.applier.picture(&owner).await? {
            Some(bytes) => {
                let blob = collaborators.blobs.upload(bytes, origin).await?;
                Ok(Some(DeltaImage::Updated(blob)))
            },
            None => {
                tracing::debug!(?owner, "picture gone before sync, reflecting removal");
                Ok(Some(DeltaImage::Removed))
            },
        },
    }
}
