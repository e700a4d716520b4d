//! Contact sync.

use mdsync_proto::{
    ConversationId,
    sync::{Contact, ContactSync, SharePolicy},
};

use super::download_picture;
use crate::{
    boundary::{AppliedContent, ApplyContext, BlobOrigin, Collaborators, ContactPictures, EntityId},
    error::SyncError,
};

pub(crate) async fn apply(
    collaborators: &Collaborators,
    sync: ContactSync,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    match sync {
        ContactSync::Create(contact) => create(collaborators, contact, context).await,
        ContactSync::Update(delta) => update(collaborators, delta, context).await,
        ContactSync::Delete { identity } => delete(collaborators, identity, context).await,
    }
}

async fn create(
    collaborators: &Collaborators,
    contact: Contact,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let identity = contact.identity.clone();
    if collaborators.applier.contact(&identity).await?.is_some() {
        return Err(SyncError::ContactAlreadyExists { identity });
    }
    if contact.public_key.is_none() {
        return Err(SyncError::MissingPublicKey { identity });
    }

    let pictures = pictures(collaborators, &contact).await?;
    let created = AppliedContent::ContactCreated { contact, pictures };
    collaborators.applier.save(created, context).await?;
    tracing::debug!(%identity, "contact created");

    Ok(entities(identity))
}

async fn update(
    collaborators: &Collaborators,
    delta: Contact,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let identity = delta.identity.clone();
    let Some(existing) = collaborators.applier.contact(&identity).await? else {
        return Err(SyncError::ContactMissing { identity });
    };

    let pictures = pictures(collaborators, &delta).await?;
    let contact = merge(existing, delta);
    let updated = AppliedContent::ContactUpdated { contact, pictures };
    collaborators.applier.save(updated, context).await?;
    tracing::debug!(%identity, "contact updated");

    Ok(entities(identity))
}

async fn delete(
    collaborators: &Collaborators,
    identity: String,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    if collaborators.applier.contact(&identity).await?.is_none() {
        return Err(SyncError::ContactMissing { identity });
    }

    let applier = &collaborators.applier;
    let mut changed = entities(identity.clone());

    let mut settings = applier.settings().await?;
    let blocked = remove_identity(settings.blocked_identities.as_mut(), &identity);
    let settings = blocked.then_some(settings);
    if settings.is_some() {
        changed.push(EntityId::Settings);
    }

    let mut profile = applier.user_profile().await?;
    let shared_with = match profile.profile_picture_share_with.as_mut() {
        Some(SharePolicy::AllowList(identities)) => Some(identities),
        _ => None,
    };
    let shared = remove_identity(shared_with, &identity);
    let profile = shared.then_some(profile);
    if profile.is_some() {
        changed.push(EntityId::UserProfile);
    }

    let deleted = AppliedContent::ContactDeleted { identity: identity.clone(), settings, profile };
    applier.save(deleted, context).await?;
    tracing::debug!(%identity, "contact deleted");
    Ok(changed)
}

/// Overlay the fields present in `delta` onto `base`. The identity of `base`
/// is kept.
pub(crate) fn merge(base: Contact, delta: Contact) -> Contact {
    Contact {
        identity: base.identity,
        public_key: delta.public_key.or(base.public_key),
        created_at: delta.created_at.or(base.created_at),
        first_name: delta.first_name.or(base.first_name),
        last_name: delta.last_name.or(base.last_name),
        nickname: delta.nickname.or(base.nickname),
        verification_level: delta.verification_level.or(base.verification_level),
        identity_type: delta.identity_type.or(base.identity_type),
        acquaintance_level: delta.acquaintance_level.or(base.acquaintance_level),
        activity_state: delta.activity_state.or(base.activity_state),
        sync_state: delta.sync_state.or(base.sync_state),
        conversation_category: delta.conversation_category.or(base.conversation_category),
        conversation_visibility: delta.conversation_visibility.or(base.conversation_visibility),
        user_defined_profile_picture: delta
            .user_defined_profile_picture
            .or(base.user_defined_profile_picture),
        contact_defined_profile_picture: delta
            .contact_defined_profile_picture
            .or(base.contact_defined_profile_picture),
    }
}

async fn pictures(
    collaborators: &Collaborators,
    contact: &Contact,
) -> Result<ContactPictures, SyncError> {
    Ok(ContactPictures {
        user_defined: download_picture(
            collaborators,
            contact.user_defined_profile_picture.as_ref(),
            BlobOrigin::Local,
        )
        .await?,
        contact_defined: download_picture(
            collaborators,
            contact.contact_defined_profile_picture.as_ref(),
            BlobOrigin::Public,
        )
        .await?,
    })
}

fn remove_identity(identities: Option<&mut Vec<String>>, identity: &str) -> bool {
    let Some(identities) = identities else {
        return false;
    };
    let before = identities.len();
    identities.retain(|candidate| candidate != identity);
    identities.len() != before
}

fn entities(identity: String) -> Vec<EntityId> {
    vec![
        EntityId::Conversation(ConversationId::Contact(identity.clone())),
        EntityId::Contact(identity),
    ]
}

#[cfg(test)]
mod tests {
    use mdsync_proto::sync::{ConversationVisibility, VerificationLevel};

    use super::*;

    #[test]
    fn merge_overwrites_present_fields_only() {
        let base = Contact {
            public_key: Some([1; 32]),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            verification_level: Some(VerificationLevel::Unverified),
            ..Contact::new("ECHOECHO")
        };
        let delta = Contact {
            first_name: Some("Augusta".into()),
            verification_level: Some(VerificationLevel::FullyVerified),
            conversation_visibility: Some(ConversationVisibility::Pinned),
            ..Contact::new("ECHOECHO")
        };

        let merged = merge(base, delta);
        assert_eq!(merged.first_name.as_deref(), Some("Augusta"));
        assert_eq!(merged.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(merged.public_key, Some([1; 32]));
        assert_eq!(merged.verification_level, Some(VerificationLevel::FullyVerified));
        assert_eq!(merged.conversation_visibility, Some(ConversationVisibility::Pinned));
    }

    #[test]
    fn later_delta_wins() {
        let base = Contact::new("ECHOECHO");
        let first = Contact { nickname: Some("one".into()), ..Contact::new("ECHOECHO") };
        let second = Contact { nickname: Some("two".into()), ..Contact::new("ECHOECHO") };

        let merged = merge(merge(base, first), second);
        assert_eq!(merged.nickname.as_deref(), Some("two"));
    }

    #[test]
    fn remove_identity_reports_change() {
        let mut list = vec!["AAAAAAAA".to_string(), "BBBBBBBB".to_string()];
        assert!(remove_identity(Some(&mut list), "AAAAAAAA"));
        assert_eq!(list, vec!["BBBBBBBB".to_string()]);
        assert!(!remove_identity(Some(&mut list), "AAAAAAAA"));
        assert!(!remove_identity(None, "AAAAAAAA"));
    }
}
