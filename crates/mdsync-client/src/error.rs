//! Error types for the device runtime.
//!
//! [`SyncError`] covers applying reflected envelopes and running outbound
//! sync tasks. [`LinkError`] ends a mediator connection. [`StoreError`] is
//! what collaborators return across the boundary traits.

use std::time::Duration;

use mdsync_core::{CloseCode, EnvelopeError, HandshakeError, TransactionError};
use mdsync_proto::{ConversationId, GroupIdentity, ProtocolError, ReflectId};
use thiserror::Error;

/// Failure reported by a collaborator (persistence, blob storage).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Errors raised while applying or producing sync content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Sender of an incoming message is unknown
    #[error("sender {identity} not found")]
    SenderNotFound {
        /// Sender identity
        identity: String,
    },

    /// Conversation of an outgoing message or update is unknown
    #[error("receiver {conversation} not found")]
    ReceiverNotFound {
        /// Conversation
        conversation: ConversationId,
    },

    /// Group of a group message is unknown
    #[error("group {group_identity} not found")]
    GroupNotFound {
        /// Group
        group_identity: GroupIdentity,
    },

    /// Contact create for an existing contact
    #[error("contact {identity} already exists")]
    ContactAlreadyExists {
        /// Contact identity
        identity: String,
    },

    /// Contact update or delete for a missing contact
    #[error("contact {identity} does not exist")]
    ContactMissing {
        /// Contact identity
        identity: String,
    },

    /// Contact create without a public key
    #[error("contact {identity} has no public key")]
    MissingPublicKey {
        /// Contact identity
        identity: String,
    },

    /// Group create for an existing group
    #[error("group {group_identity} already exists")]
    GroupAlreadyExists {
        /// Group
        group_identity: GroupIdentity,
    },

    /// Group update or delete for a missing group
    #[error("group {group_identity} does not exist")]
    GroupMissing {
        /// Group
        group_identity: GroupIdentity,
    },

    /// Content is valid but will not be applied on this device
    #[error("content won't be processed: {reason}")]
    WontProcess {
        /// Why
        reason: String,
    },

    /// Envelope sealing or opening failed
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Content could not be decoded or encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transaction failed
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Collaborator failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Mediator did not ack a reflect in time
    #[error("reflect {reflect_id} not acknowledged")]
    ReflectTimeout {
        /// Unacknowledged reflect
        reflect_id: ReflectId,
    },

    /// Sync did not complete within its deadline
    #[error("sync timed out after {elapsed:?}")]
    Timeout {
        /// Deadline that passed
        elapsed: Duration,
    },

    /// Link is not established
    #[error("mediator link not established")]
    NotEstablished,

    /// Link shut down while the operation was in flight
    #[error("mediator link closed")]
    LinkClosed,
}

impl SyncError {
    /// Returns true if the same content may apply later, e.g. once the
    /// missing contact arrived. Retryable content is not acknowledged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SenderNotFound { .. }
            | Self::ReceiverNotFound { .. }
            | Self::GroupNotFound { .. }
            | Self::Store(_)
            | Self::ReflectTimeout { .. }
            | Self::Timeout { .. }
            | Self::NotEstablished
            | Self::LinkClosed => true,
            Self::Envelope(e) => e.is_transient(),
            Self::Transaction(e) => e.is_transient(),
            Self::ContactAlreadyExists { .. }
            | Self::ContactMissing { .. }
            | Self::MissingPublicKey { .. }
            | Self::GroupAlreadyExists { .. }
            | Self::GroupMissing { .. }
            | Self::WontProcess { .. }
            | Self::Protocol(_) => false,
        }
    }

    /// Content is skipped and acknowledged without being applied.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::WontProcess { .. })
    }

    pub(crate) fn wont_process(reason: impl Into<String>) -> Self {
        Self::WontProcess { reason: reason.into() }
    }
}

/// Errors that end a mediator link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport closed by the mediator
    #[error("connection lost")]
    ConnectionLost,

    /// Handshake failed
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Frame could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// This device closed the link
    #[error("closed with code {}", code.code())]
    Closed {
        /// Close code sent to the mediator
        code: CloseCode,
    },

    /// Too many reflected envelopes in a row could not be opened
    #[error("{count} consecutive envelope decode failures")]
    TooManyDecodeFailures {
        /// Failures in a row
        count: u32,
    },
}

impl LinkError {
    /// Returns true if reconnecting may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::ConnectionLost => true,
            Self::Handshake(e) => e.is_transient(),
            Self::Protocol(_) | Self::Closed { .. } | Self::TooManyDecodeFailures { .. } => false,
        }
    }
}
