//! Incoming and outgoing messages and their state updates.

use mdsync_proto::{
    ConversationId, GroupIdentity, MessageContent, MessageKind,
    content::{CallSignal, DeliveryReceipt, GroupCallStart, Grouped, ReceiptStatus},
    messages::{IncomingMessage, IncomingMessageUpdate, OutgoingMessage, OutgoingMessageUpdate},
};

use super::download;
use crate::{
    boundary::{
        AppliedContent, AppliedMessage, ApplyContext, BlobOrigin, CallEvent, CallPayload,
        Collaborators, EntityId,
    },
    error::SyncError,
};

/// Message received by another device of the group.
pub(crate) async fn apply_incoming(
    collaborators: &Collaborators,
    message: IncomingMessage,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let observer = &collaborators.observer;
    let message_id = message.message_id;
    observer.on_incoming_message_started(message_id);
    let result = incoming(collaborators, message, context).await;
    observer.on_incoming_message_finished(message_id);
    result
}

async fn incoming(
    collaborators: &Collaborators,
    message: IncomingMessage,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let applier = &collaborators.applier;
    let content = MessageContent::decode(message.kind, &message.body)?;

    if matches!(content, MessageContent::TypingIndicator(_)) {
        return Err(SyncError::wont_process("typing indicator"));
    }

    if let Some(signal) = call_signal(&content) {
        collaborators
            .calls
            .hand_off(CallEvent {
                conversation: ConversationId::Contact(message.sender_identity.clone()),
                sender: Some(message.sender_identity),
                kind: message.kind,
                payload: CallPayload::Signal(signal.clone()),
            })
            .await;
        return Ok(Vec::new());
    }

    if applier.contact(&message.sender_identity).await?.is_none() {
        return Err(SyncError::SenderNotFound { identity: message.sender_identity });
    }

    let conversation = match content.group() {
        Some(group_identity) => {
            let is_setup = matches!(content, MessageContent::GroupSetup(_));
            if !is_setup && applier.group(group_identity).await?.is_none() {
                return Err(SyncError::GroupNotFound { group_identity: group_identity.clone() });
            }
            ConversationId::Group(group_identity.clone())
        },
        None => ConversationId::Contact(message.sender_identity.clone()),
    };

    if let Some(receipt) = receipt(&content) {
        mark_receipt(collaborators, &conversation, receipt, message.created_at).await?;
        return Ok(vec![EntityId::Conversation(conversation)]);
    }

    let attachment = attachment(collaborators, &content, BlobOrigin::Public).await?;
    let mut changed = vec![EntityId::Conversation(conversation.clone())];
    match &content {
        MessageContent::ContactSetProfilePicture(_)
        | MessageContent::ContactDeleteProfilePicture => {
            changed.push(EntityId::Contact(message.sender_identity.clone()));
        },
        other if other.kind().is_group() && !is_group_chat(other) => {
            if let Some(group_identity) = other.group() {
                changed.push(EntityId::Group(group_identity.clone()));
            }
        },
        _ => {},
    }

    let group_call = group_call(&content).map(|start| CallEvent {
        conversation: conversation.clone(),
        sender: Some(message.sender_identity.clone()),
        kind: message.kind,
        payload: CallPayload::GroupCallStart(start.clone()),
    });

    applier
        .save(
            AppliedContent::IncomingMessage(AppliedMessage {
                conversation,
                sender: Some(message.sender_identity),
                message_id: message.message_id,
                thread_message_id: None,
                created_at: message.created_at,
                content,
                attachment,
            }),
            context,
        )
        .await?;
    tracing::debug!(
        message_id = %message.message_id,
        kind = ?message.kind,
        "incoming message applied"
    );

    if let Some(event) = group_call {
        collaborators.calls.hand_off(event).await;
    }
    Ok(changed)
}

/// Message sent from another device of the group.
pub(crate) async fn apply_outgoing(
    collaborators: &Collaborators,
    message: OutgoingMessage,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let applier = &collaborators.applier;

    if message.kind.is_deprecated_media() {
        return Err(SyncError::wont_process(format!("deprecated outgoing {:?}", message.kind)));
    }

    let content = MessageContent::decode(message.kind, &message.body)?;
    if matches!(content, MessageContent::TypingIndicator(_)) {
        return Err(SyncError::wont_process("typing indicator"));
    }

    if let Some(signal) = call_signal(&content) {
        if !matches!(message.conversation, ConversationId::Contact(_)) {
            return Err(SyncError::wont_process("call signal outside a contact conversation"));
        }
        let event = CallEvent {
            conversation: message.conversation,
            sender: None,
            kind: message.kind,
            payload: CallPayload::Signal(signal.clone()),
        };
        collaborators.calls.hand_off(event).await;
        return Ok(Vec::new());
    }

    if !applier.existing_conversation(&message.conversation).await? {
        return Err(SyncError::ReceiverNotFound { conversation: message.conversation });
    }

    if let Some(receipt) = receipt(&content) {
        mark_receipt(collaborators, &message.conversation, receipt, message.created_at).await?;
        return Ok(vec![EntityId::Conversation(message.conversation)]);
    }

    let attachment = attachment(collaborators, &content, BlobOrigin::Public).await?;
    let changed = vec![EntityId::Conversation(message.conversation.clone())];
    let group_call = group_call(&content).map(|start| CallEvent {
        conversation: message.conversation.clone(),
        sender: None,
        kind: message.kind,
        payload: CallPayload::GroupCallStart(start.clone()),
    });

    applier
        .save(
            AppliedContent::OutgoingMessage(AppliedMessage {
                conversation: message.conversation,
                sender: None,
                message_id: message.message_id,
                thread_message_id: message.thread_message_id,
                created_at: message.created_at,
                content,
                attachment,
            }),
            context,
        )
        .await?;
    tracing::debug!(
        message_id = %message.message_id,
        kind = ?message.kind,
        "outgoing message applied"
    );

    if let Some(event) = group_call {
        collaborators.calls.hand_off(event).await;
    }
    Ok(changed)
}

/// Messages read on another device.
pub(crate) async fn apply_incoming_update(
    collaborators: &Collaborators,
    update: IncomingMessageUpdate,
) -> Result<Vec<EntityId>, SyncError> {
    let applier = &collaborators.applier;
    let mut changed = Vec::with_capacity(update.updates.len());

    for read in update.updates {
        if !applier.existing_conversation(&read.conversation).await? {
            return Err(SyncError::ReceiverNotFound { conversation: read.conversation });
        }
        applier.mark_read(&read.conversation, read.message_id, read.read_at).await?;
        push_unique(&mut changed, EntityId::Conversation(read.conversation));
    }

    Ok(changed)
}

/// Messages sent by another device. The reflection timestamp is the send
/// time.
pub(crate) async fn apply_outgoing_update(
    collaborators: &Collaborators,
    update: OutgoingMessageUpdate,
    context: ApplyContext,
) -> Result<Vec<EntityId>, SyncError> {
    let applier = &collaborators.applier;
    let mut changed = Vec::with_capacity(update.updates.len());

    for sent in update.updates {
        if !applier.existing_conversation(&sent.conversation).await? {
            return Err(SyncError::ReceiverNotFound { conversation: sent.conversation });
        }
        applier.mark_sent(&sent.conversation, sent.message_id, context.reflected_at).await?;
        push_unique(&mut changed, EntityId::Conversation(sent.conversation));
    }

    Ok(changed)
}

async fn mark_receipt(
    collaborators: &Collaborators,
    conversation: &ConversationId,
    receipt: &DeliveryReceipt,
    at: u64,
) -> Result<(), SyncError> {
    let applier = &collaborators.applier;
    for &message_id in &receipt.message_ids {
        match receipt.status {
            ReceiptStatus::Received => applier.mark_delivered(conversation, message_id, at).await?,
            ReceiptStatus::Read => applier.mark_read(conversation, message_id, at).await?,
            ReceiptStatus::Acknowledged | ReceiptStatus::Declined => {
                tracing::debug!(%message_id, status = ?receipt.status, "reaction receipt ignored");
            },
        }
    }
    Ok(())
}

async fn attachment(
    collaborators: &Collaborators,
    content: &MessageContent,
    origin: BlobOrigin,
) -> Result<Option<bytes::Bytes>, SyncError> {
    let blob = match content {
        MessageContent::File(file) => file.thumbnail.as_ref(),
        MessageContent::GroupFile(file) => file.inner.thumbnail.as_ref(),
        MessageContent::ContactSetProfilePicture(picture) => Some(&picture.blob),
        MessageContent::GroupSetProfilePicture(picture) => Some(&picture.inner.blob),
        _ => None,
    };

    match blob {
        Some(blob) => download(collaborators, blob, origin).await.map(Some),
        None => Ok(None),
    }
}

fn call_signal(content: &MessageContent) -> Option<&CallSignal> {
    match content {
        MessageContent::CallOffer(signal)
        | MessageContent::CallAnswer(signal)
        | MessageContent::CallIceCandidate(signal)
        | MessageContent::CallHangup(signal)
        | MessageContent::CallRinging(signal) => Some(signal),
        _ => None,
    }
}

fn group_call(content: &MessageContent) -> Option<&Grouped<GroupCallStart>> {
    match content {
        MessageContent::GroupCallStart(start) => Some(start),
        _ => None,
    }
}

fn receipt(content: &MessageContent) -> Option<&DeliveryReceipt> {
    match content {
        MessageContent::DeliveryReceipt(receipt) => Some(receipt),
        MessageContent::GroupDeliveryReceipt(grouped) => Some(&grouped.inner),
        _ => None,
    }
}

/// Group content that is conversation traffic rather than group management.
fn is_group_chat(content: &MessageContent) -> bool {
    matches!(
        content,
        MessageContent::GroupText(_)
            | MessageContent::GroupLocation(_)
            | MessageContent::GroupFile(_)
            | MessageContent::GroupAudio(_)
            | MessageContent::GroupImage(_)
            | MessageContent::GroupVideo(_)
            | MessageContent::GroupPollSetup(_)
            | MessageContent::GroupPollVote(_)
            | MessageContent::GroupCallStart(_)
    )
}

fn push_unique(entities: &mut Vec<EntityId>, entity: EntityId) {
    if !entities.contains(&entity) {
        entities.push(entity);
    }
}

/// Group a message body belongs to, if any.
pub(crate) fn group_of(kind: MessageKind, body: &[u8]) -> Option<GroupIdentity> {
    if !kind.is_group() {
        return None;
    }
    MessageContent::decode(kind, body).ok().and_then(|content| content.group().cloned())
}
