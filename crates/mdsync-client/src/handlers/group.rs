//! Group sync.

use mdsync_proto::{
    ConversationId, GroupIdentity,
    sync::{Group, GroupSync},
};

use super::download_picture;
use crate::{
    boundary::{AppliedContent, ApplyContext, BlobOrigin, Collaborators, EntityId},
    error::SyncError,
};

pub(crate) async fn apply(
    collaborators: &Collaborators,
    sync: GroupSync,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let applier = &collaborators.applier;

    match sync {
        GroupSync::Create(group) => {
            let group_identity = group.group_identity.clone();
            if applier.group(&group_identity).await?.is_some() {
                return Err(SyncError::GroupAlreadyExists { group_identity });
            }

            let picture =
                download_picture(collaborators, group.profile_picture.as_ref(), BlobOrigin::Local)
                    .await?;
            applier.save(AppliedContent::GroupCreated { group, picture }, context).await?;
            tracing::debug!(%group_identity, "group created");
            Ok(entities(group_identity))
        },
        GroupSync::Update(delta) => {
            let group_identity = delta.group_identity.clone();
            let Some(existing) = applier.group(&group_identity).await? else {
                return Err(SyncError::GroupMissing { group_identity });
            };

            let picture =
                download_picture(collaborators, delta.profile_picture.as_ref(), BlobOrigin::Local)
                    .await?;
            let group = merge(existing, delta);
            applier.save(AppliedContent::GroupUpdated { group, picture }, context).await?;
            tracing::debug!(%group_identity, "group updated");
            Ok(entities(group_identity))
        },
        GroupSync::Delete { group_identity } => {
            if applier.group(&group_identity).await?.is_none() {
                return Err(SyncError::GroupMissing { group_identity });
            }

            let deleted = AppliedContent::GroupDeleted { group_identity: group_identity.clone() };
            applier.save(deleted, context).await?;
            tracing::debug!(%group_identity, "group deleted");
            Ok(entities(group_identity))
        },
    }
}

/// Overlay the fields present in `delta` onto `base`.
pub(crate) fn merge(base: Group, delta: Group) -> Group {
    Group {
        group_identity: base.group_identity,
        name: delta.name.or(base.name),
        created_at: delta.created_at.or(base.created_at),
        user_state: delta.user_state.or(base.user_state),
        member_identities: delta.member_identities.or(base.member_identities),
        profile_picture: delta.profile_picture.or(base.profile_picture),
        conversation_category: delta.conversation_category.or(base.conversation_category),
        conversation_visibility: delta.conversation_visibility.or(base.conversation_visibility),
    }
}

fn entities(group_identity: GroupIdentity) -> Vec<EntityId> {
    vec![
        EntityId::Conversation(ConversationId::Group(group_identity.clone())),
        EntityId::Group(group_identity),
    ]
}
