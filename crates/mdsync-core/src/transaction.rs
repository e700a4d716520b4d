//! Transaction coordinator.
//!
//! A transaction is a device-group-wide lock around a mutually exclusive
//! change (contact sync, group sync, ...). The coordinator produces the lock
//! and unlock frames and interprets the mediator's responses. Guarded work may
//! only run between [`TransactionEvent::Locked`] and [`commit`].
//!
//! ```text
//! Idle ──begin──> AwaitingLockAck ──LockAck──> Locked ──commit──> AwaitingUnlockAck
//!  ↑                    │                                               │
//!  └────── Rejected ────┘                                               │
//!  └──────────────────────────────── UnlockAck ─────────────────────────┘
//! ```
//!
//! [`commit`]: TransactionCoordinator::commit

use std::time::Duration;

use mdsync_crypto::{DeviceGroupKeys, open, seal};
use mdsync_proto::{
    Frame, Payload,
    payloads::transaction::{BeginTransaction, TransactionScope},
};

use crate::{
    Environment,
    error::{EnvelopeError, TransactionError},
};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction
    Idle,
    /// `Lock` sent
    AwaitingLockAck {
        /// Requested scope
        scope: TransactionScope,
    },
    /// Lock held, guarded work may run
    Locked {
        /// Held scope
        scope: TransactionScope,
    },
    /// `Unlock` sent
    AwaitingUnlockAck {
        /// Released scope
        scope: TransactionScope,
    },
}

/// Outcome of a transaction response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    /// Lock acquired
    Locked {
        /// Held scope
        scope: TransactionScope,
    },
    /// Lock released
    Committed {
        /// Released scope
        scope: TransactionScope,
    },
    /// A lock held by another device was released; a rejected begin may be
    /// retried
    Ended {
        /// Device that held the lock
        device_id: u64,
        /// Scope byte of the released lock
        scope: u8,
    },
}

/// Begin/commit protocol for one device.
///
/// Generic over the environment's instant type so ack timeouts run on
/// simulated time.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator<I> {
    state: TransactionState,
    timeout: Duration,
    ttl_secs: Option<u32>,
    waiting_since: Option<I>,
}

impl<I> TransactionCoordinator<I>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    /// New idle coordinator.
    pub fn new(timeout: Duration, ttl_secs: Option<u32>) -> Self {
        Self { state: TransactionState::Idle, timeout, ttl_secs, waiting_since: None }
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Lock is held.
    pub fn is_locked(&self) -> bool {
        matches!(self.state, TransactionState::Locked { .. })
    }

    /// Build the `Lock` frame for `scope`.
    ///
    /// # Errors
    ///
    /// - `AlreadyInProgress` unless idle
    /// - `Scope` if the frame cannot be encoded
    pub fn begin<E: Environment<Instant = I>>(
        &mut self,
        env: &E,
        keys: &DeviceGroupKeys,
        scope: TransactionScope,
    ) -> Result<Frame, TransactionError> {
        if self.state != TransactionState::Idle {
            return Err(TransactionError::AlreadyInProgress);
        }

        let encrypted_scope = seal(keys.transaction_scope(), &env.random_nonce(), &[scope.to_u8()]);
        let frame = Payload::BeginTransaction(BeginTransaction {
            encrypted_scope,
            ttl_secs: self.ttl_secs,
        })
        .into_frame()
        .map_err(EnvelopeError::Encode)?;

        self.state = TransactionState::AwaitingLockAck { scope };
        self.waiting_since = Some(env.now());
        tracing::debug!(%scope, "begin transaction");

        Ok(frame)
    }

    /// Build the `Unlock` frame.
    ///
    /// # Errors
    ///
    /// - `NotLocked` unless the lock is held
    pub fn commit<E: Environment<Instant = I>>(
        &mut self,
        env: &E,
    ) -> Result<Frame, TransactionError> {
        let TransactionState::Locked { scope } = self.state else {
            return Err(TransactionError::NotLocked);
        };

        let frame = Payload::CommitTransaction.into_frame().map_err(EnvelopeError::Encode)?;

        self.state = TransactionState::AwaitingUnlockAck { scope };
        self.waiting_since = Some(env.now());
        tracing::debug!(%scope, "commit transaction");

        Ok(frame)
    }

    /// Process a mediator payload.
    ///
    /// Returns `Ok(None)` for payloads unrelated to transactions while no ack
    /// is awaited.
    ///
    /// # Errors
    ///
    /// - `Rejected` if another device holds a lock; the coordinator is idle
    ///   again
    /// - `BadResponse` for anything else while an ack is awaited; the
    ///   coordinator is idle again
    /// - `Scope` if a rejected or ended scope cannot be opened
    pub fn handle(
        &mut self,
        keys: &DeviceGroupKeys,
        payload: &Payload,
    ) -> Result<Option<TransactionEvent>, TransactionError> {
        match (self.state, payload) {
            (TransactionState::AwaitingLockAck { scope }, Payload::BeginTransactionAck) => {
                self.state = TransactionState::Locked { scope };
                self.waiting_since = None;
                tracing::info!(%scope, "transaction locked");
                Ok(Some(TransactionEvent::Locked { scope }))
            },
            (TransactionState::AwaitingUnlockAck { scope }, Payload::CommitTransactionAck) => {
                self.reset();
                tracing::info!(%scope, "transaction committed");
                Ok(Some(TransactionEvent::Committed { scope }))
            },
            (
                TransactionState::AwaitingLockAck { scope },
                Payload::TransactionRejected(rejected),
            ) => {
                self.reset();
                let held = open_scope(keys, &rejected.encrypted_scope)?;
                tracing::warn!(
                    requested = %scope,
                    held = held,
                    holder = rejected.device_id,
                    "transaction rejected"
                );
                Err(TransactionError::Rejected { scope: held, same_scope: held == scope.to_u8() })
            },
            (_, Payload::TransactionEnded(ended)) => {
                let scope = open_scope(keys, &ended.encrypted_scope)?;
                tracing::debug!(device_id = ended.device_id, scope, "transaction ended elsewhere");
                Ok(Some(TransactionEvent::Ended { device_id: ended.device_id, scope }))
            },
            (
                TransactionState::AwaitingLockAck { .. }
                | TransactionState::AwaitingUnlockAck { .. },
                other,
            )
            | (
                TransactionState::Idle | TransactionState::Locked { .. },
                other @ (Payload::BeginTransactionAck
                | Payload::CommitTransactionAck
                | Payload::TransactionRejected(_)),
            ) => {
                let message_type = other.message_type();
                tracing::warn!(?message_type, state = ?self.state, "bad transaction response");
                self.reset();
                Err(TransactionError::BadResponse { message_type })
            },
            _ => Ok(None),
        }
    }

    /// Fail an ack that did not arrive within the timeout.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if an ack is overdue; the coordinator is idle again
    pub fn check_timeout(&mut self, now: I) -> Result<(), TransactionError> {
        let Some(since) = self.waiting_since else {
            return Ok(());
        };

        let elapsed = now - since;
        if elapsed >= self.timeout {
            tracing::warn!(?elapsed, state = ?self.state, "transaction ack timed out");
            self.reset();
            return Err(TransactionError::LockTimeout { elapsed });
        }

        Ok(())
    }

    /// Time left until the pending ack times out.
    pub fn time_remaining(&self, now: I) -> Option<Duration> {
        self.waiting_since.map(|since| self.timeout.saturating_sub(now - since))
    }

    /// Forget the current transaction (connection lost, guarded work failed).
    pub fn abort(&mut self) {
        if self.state != TransactionState::Idle {
            tracing::debug!(state = ?self.state, "transaction aborted");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = TransactionState::Idle;
        self.waiting_since = None;
    }
}

fn open_scope(keys: &DeviceGroupKeys, encrypted_scope: &[u8]) -> Result<u8, EnvelopeError> {
    let scope = open(keys.transaction_scope(), encrypted_scope)
        .map_err(|_| EnvelopeError::DecryptionFailed)?;
    match scope.as_slice() {
        [byte] => Ok(*byte),
        _ => Err(EnvelopeError::DecryptionFailed),
    }
}
