//! User profile and settings.

use mdsync_proto::sync::{Settings, SettingsSync, UserProfile, UserProfileSync};

use super::download_picture;
use crate::{
    boundary::{AppliedContent, ApplyContext, BlobOrigin, Collaborators, EntityId},
    error::SyncError,
};

pub(crate) async fn apply_user_profile(
    collaborators: &Collaborators,
    UserProfileSync::Update(delta): UserProfileSync,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let picture =
        download_picture(collaborators, delta.profile_picture.as_ref(), BlobOrigin::Local).await?;
    let base = collaborators.applier.user_profile().await?;
    let profile = UserProfile {
        nickname: delta.nickname.or(base.nickname),
        profile_picture: delta.profile_picture.or(base.profile_picture),
        profile_picture_share_with: delta
            .profile_picture_share_with
            .or(base.profile_picture_share_with),
    };

    collaborators.applier.save(AppliedContent::UserProfile { profile, picture }, context).await?;
    tracing::debug!("user profile updated");
    Ok(vec![EntityId::UserProfile])
}

pub(crate) async fn apply_settings(
    collaborators: &Collaborators,
    SettingsSync::Update(delta): SettingsSync,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let base = collaborators.applier.settings().await?;
    let settings = Settings {
        contact_sync_policy: delta.contact_sync_policy.or(base.contact_sync_policy),
        unknown_contact_policy: delta.unknown_contact_policy.or(base.unknown_contact_policy),
        read_receipt_policy: delta.read_receipt_policy.or(base.read_receipt_policy),
        typing_indicator_policy: delta.typing_indicator_policy.or(base.typing_indicator_policy),
        call_policy: delta.call_policy.or(base.call_policy),
        screenshot_policy: delta.screenshot_policy.or(base.screenshot_policy),
        blocked_identities: delta.blocked_identities.or(base.blocked_identities),
        excluded_from_sync_identities: delta
            .excluded_from_sync_identities
            .or(base.excluded_from_sync_identities),
    };

    collaborators.applier.save(AppliedContent::Settings(settings), context).await?;
    tracing::debug!("settings updated");
    Ok(vec![EntityId::Settings])
}
