//! Per-kind handlers for reflected envelope content.
//!
//! Each handler validates the content against the local state reached
//! through [`MessageApplier`](crate::boundary::MessageApplier), merges it,
//! and persists the result. Handlers return the entities they changed so the
//! dispatcher can notify the observer after the nonce is marked.

pub mod contact;
pub mod group;
pub mod message;
pub mod profile;

use mdsync_proto::{
    EnvelopeContent,
    sync::{Blob, DeltaImage, DistributionListSync, MdmParameterSync},
};

use crate::{
    boundary::{AppliedContent, ApplyContext, BlobOrigin, Collaborators, EntityId, PictureChange},
    error::SyncError,
};

/// Apply one envelope content.
pub(crate) async fn route(
    collaborators: &Collaborators,
    content: EnvelopeContent,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    match content {
        EnvelopeContent::ContactSync(sync) => contact::apply(collaborators, sync, context).await,
        EnvelopeContent::GroupSync(sync) => group::apply(collaborators, sync, context).await,
        EnvelopeContent::DistributionListSync(sync) => {
            let entity = EntityId::DistributionList(match &sync {
                DistributionListSync::Create(list) | DistributionListSync::Update(list) => {
                    list.distribution_list_id
                },
                DistributionListSync::Delete { distribution_list_id } => *distribution_list_id,
            });
            collaborators.applier.save(AppliedContent::DistributionList(sync), context).await?;
            Ok(vec![entity])
        },
        EnvelopeContent::IncomingMessage(incoming) => {
            message::apply_incoming(collaborators, incoming, context).await
        },
        EnvelopeContent::OutgoingMessage(outgoing) => {
            message::apply_outgoing(collaborators, outgoing, context).await
        },
        EnvelopeContent::IncomingMessageUpdate(update) => {
            message::apply_incoming_update(collaborators, update).await
        },
        EnvelopeContent::OutgoingMessageUpdate(update) => {
            message::apply_outgoing_update(collaborators, update, context).await
        },
        EnvelopeContent::UserProfileSync(sync) => {
            profile::apply_user_profile(collaborators, sync, context).await
        },
        EnvelopeContent::SettingsSync(sync) => {
            profile::apply_settings(collaborators, sync, context).await
        },
        EnvelopeContent::MdmParameterSync(MdmParameterSync::Update(parameters)) => {
            collaborators.applier.save(AppliedContent::MdmParameters(parameters), context).await?;
            Ok(vec![EntityId::Settings])
        },
    }
}

/// Download a blob. A blob that no longer exists is not an error of the
/// envelope: the content is skipped and acknowledged.
pub(crate) async fn download(
    collaborators: &Collaborators,
    blob: &Blob,
    origin: BlobOrigin,
) -> Result<bytes::Bytes, SyncError> {
    collaborators
        .blobs
        .download(blob.id, blob.key, origin)
        .await?
        .ok_or_else(|| SyncError::wont_process(format!("blob {} not found", blob_label(blob))))
}

/// Resolve a picture delta to bytes.
pub(crate) async fn download_picture(
    collaborators: &Collaborators,
    image: Option<&DeltaImage>,
    origin: BlobOrigin,
) -> Result<Option<PictureChange>, SyncError> {
    match image {
        None => Ok(None),
        Some(DeltaImage::Removed) => Ok(Some(PictureChange::Removed)),
        Some(DeltaImage::Updated(blob)) => {
            let bytes = download(collaborators, blob, origin).await?;
            Ok(Some(PictureChange::Updated(bytes)))
        },
    }
}

fn blob_label(blob: &Blob) -> String {
    blob.id.iter().map(|byte| format!("{byte:02x}")).collect()
}
