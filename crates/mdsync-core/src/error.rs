//! Error types for the sync protocol core.
//!
//! One enum per state machine. Wire and crypto failures are wrapped so the
//! driver can decide per error whether to retry, skip or disconnect.

use std::time::Duration;

use mdsync_proto::{MessageType, ProtocolError};
use thiserror::Error;

use crate::handshake::HandshakeState;

/// Errors raised while sealing or opening envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Session holds no device group keys (not derived yet or deactivated)
    #[error("device group keys unavailable")]
    KeyUnavailable,

    /// Authentication failed or the ciphertext is truncated
    #[error("envelope decryption failed")]
    DecryptionFailed,

    /// Plaintext is not a valid envelope
    #[error("envelope decode failed: {0}")]
    Decode(ProtocolError),

    /// Envelope could not be serialized
    #[error("envelope encode failed: {0}")]
    Encode(ProtocolError),
}

impl EnvelopeError {
    /// Returns true if this error may succeed on retry.
    ///
    /// Only missing keys are transient: they appear once multi-device is
    /// activated. A ciphertext that fails to open never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::KeyUnavailable)
    }
}

/// Errors raised by the handshake state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Message not valid in the current handshake state
    #[error("unexpected {message_type:?} in handshake state {state:?}")]
    UnexpectedMessage {
        /// Current state
        state: HandshakeState,
        /// Offending message type
        message_type: MessageType,
    },

    /// Frame body could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Keys needed to answer the challenge are missing
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl HandshakeError {
    /// Returns true if reconnecting may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UnexpectedMessage { .. } | Self::Protocol(_) => false,
            Self::Envelope(e) => e.is_transient(),
        }
    }
}

/// Errors raised by the transaction coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Another device holds a transaction
    #[error("transaction rejected, reason={scope:#04x}")]
    Rejected {
        /// Scope byte of the held transaction
        scope: u8,
        /// Held scope equals the one we requested
        same_scope: bool,
    },

    /// This device already has a transaction open
    #[error("transaction already in progress")]
    AlreadyInProgress,

    /// Commit requested without holding a lock
    #[error("no transaction locked")]
    NotLocked,

    /// Unexpected message while waiting for an ack
    #[error("bad response {message_type:?} while awaiting transaction ack")]
    BadResponse {
        /// Message received instead of the ack
        message_type: MessageType,
    },

    /// No ack within the timeout
    #[error("transaction lock timed out after {elapsed:?}")]
    LockTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Scope of a rejected or ended transaction could not be opened
    #[error("transaction scope unreadable: {0}")]
    Scope(#[from] EnvelopeError),
}

impl TransactionError {
    /// Returns true if beginning the transaction again may succeed.
    ///
    /// A rejected transaction may be retried once the holder's `Ended`
    /// arrives. Protocol violations are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::LockTimeout { .. })
    }

    /// Rejected because the same kind of transaction runs elsewhere.
    pub fn is_same_transaction_in_progress(&self) -> bool {
        matches!(self, Self::Rejected { same_scope: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display() {
        let err = TransactionError::Rejected { scope: 0x02, same_scope: true };
        assert_eq!(err.to_string(), "transaction rejected, reason=0x02");
        assert!(err.is_transient());
        assert!(err.is_same_transaction_in_progress());
    }

    #[test]
    fn classification() {
        assert!(EnvelopeError::KeyUnavailable.is_transient());
        assert!(!EnvelopeError::DecryptionFailed.is_transient());
        assert!(!TransactionError::BadResponse { message_type: MessageType::Reflected }
            .is_transient());
        assert!(
            TransactionError::LockTimeout { elapsed: Duration::from_secs(30) }.is_transient()
        );
        assert!(HandshakeError::Envelope(EnvelopeError::KeyUnavailable).is_transient());
        assert!(!HandshakeError::Protocol(ProtocolError::NotMediatorFrame).is_transient());
    }
}
