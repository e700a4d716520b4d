//! Reflected envelope dispatcher.
//!
//! Applies one opened envelope at most once:
//!
//! 1. nonce already processed: discard, no ack
//! 2. content kind disabled: mark the nonce, ack, skip
//! 3. route to the handler for the content kind
//! 4. mark the nonce after the handler persisted the content
//! 5. notify the observer for every changed entity
//!
//! Handler errors leave the nonce unmarked. Skippable errors (content that
//! will never apply on this device) are acked like a success.

use mdsync_core::OpenedEnvelope;
use mdsync_proto::{ConversationId, EnvelopeContent, sync::DistributionListSync};

use crate::{
    boundary::{ApplyContext, Collaborators, EntityId},
    config::DispatchConfig,
    error::SyncError,
    handlers,
};

/// Result of dispatching one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Content was persisted
    Applied {
        /// Entities that changed
        entities: Vec<EntityId>,
    },
    /// Nonce was already processed
    Duplicate,
    /// Content will not be applied on this device
    Skipped {
        /// Why
        reason: String,
    },
}

impl DispatchOutcome {
    /// Whether the mediator should receive a `ReflectedAck`.
    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// Applies opened envelopes through the collaborators.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    collaborators: Collaborators,
    config: DispatchConfig,
}

impl Dispatcher {
    /// New dispatcher.
    pub fn new(collaborators: Collaborators, config: DispatchConfig) -> Self {
        Self { collaborators, config }
    }

    /// Apply one envelope reflected at `reflected_at` (mediator ms).
    ///
    /// # Errors
    ///
    /// Any non-skippable handler error. The nonce stays unmarked so the
    /// envelope applies when it is delivered again.
    pub async fn dispatch(
        &self,
        opened: OpenedEnvelope,
        reflected_at: u64,
    ) -> Result<DispatchOutcome, SyncError> {
        let nonces = &self.collaborators.nonces;
        let nonce = opened.nonce;
        let envelope = opened.envelope;
        let kind = envelope.kind();

        if nonces.is_processed(&nonce) {
            tracing::debug!(?kind, "discarding envelope with processed nonce");
            return Ok(DispatchOutcome::Duplicate);
        }

        if !self.config.is_enabled(kind) {
            tracing::warn!(?kind, "content kind disabled, skipping");
            nonces.mark_processed(nonce);
            return Ok(DispatchOutcome::Skipped { reason: format!("{kind:?} disabled") });
        }

        let context = ApplyContext { device_id: envelope.device_id, reflected_at };
        match handlers::route(&self.collaborators, envelope.content, context).await {
            Ok(entities) => {
                nonces.mark_processed(nonce);
                for entity in &entities {
                    self.collaborators.observer.on_entity_changed(entity);
                }
                tracing::debug!(?kind, device_id = context.device_id, "envelope applied");
                Ok(DispatchOutcome::Applied { entities })
            },
            Err(e) if e.is_skippable() => {
                nonces.mark_processed(nonce);
                tracing::warn!(?kind, error = %e, "skipping envelope");
                Ok(DispatchOutcome::Skipped { reason: e.to_string() })
            },
            Err(e) => Err(e),
        }
    }
}

/// Keys under which envelopes are applied in receive order.
///
/// Content about the same contact, group or distribution list shares a key,
/// including the messages of its conversation. Read and sent updates carry
/// the key of every conversation they touch and wait for all of them. Empty
/// for content that touches no single entity.
pub fn ordering_keys(content: &EnvelopeContent) -> Vec<EntityId> {
    let key = match content {
        EnvelopeContent::ContactSync(sync) => EntityId::Contact(sync.identity().to_owned()),
        EnvelopeContent::GroupSync(sync) => EntityId::Group(sync.group_identity().clone()),
        EnvelopeContent::DistributionListSync(sync) => EntityId::DistributionList(match sync {
            DistributionListSync::Create(list) | DistributionListSync::Update(list) => {
                list.distribution_list_id
            },
            DistributionListSync::Delete { distribution_list_id } => *distribution_list_id,
        }),
        EnvelopeContent::IncomingMessage(message) => {
            match handlers::message::group_of(message.kind, &message.body) {
                Some(group_identity) => EntityId::Group(group_identity),
                None => EntityId::Contact(message.sender_identity.clone()),
            }
        },
        EnvelopeContent::OutgoingMessage(message) => conversation_key(&message.conversation),
        EnvelopeContent::IncomingMessageUpdate(update) => {
            return conversation_keys(update.updates.iter().map(|read| &read.conversation));
        },
        EnvelopeContent::OutgoingMessageUpdate(update) => {
            return conversation_keys(update.updates.iter().map(|sent| &sent.conversation));
        },
        EnvelopeContent::UserProfileSync(_) => EntityId::UserProfile,
        EnvelopeContent::SettingsSync(_) => EntityId::Settings,
        EnvelopeContent::MdmParameterSync(_) => return Vec::new(),
    };
    vec![key]
}

fn conversation_keys<'a>(
    conversations: impl Iterator<Item = &'a ConversationId>,
) -> Vec<EntityId> {
    let mut keys = Vec::new();
    for key in conversations.map(conversation_key) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn conversation_key(conversation: &ConversationId) -> EntityId {
    match conversation {
        ConversationId::Contact(identity) => EntityId::Contact(identity.clone()),
        ConversationId::Group(group_identity) => EntityId::Group(group_identity.clone()),
        ConversationId::DistributionList(id) => EntityId::DistributionList(*id),
    }
}
