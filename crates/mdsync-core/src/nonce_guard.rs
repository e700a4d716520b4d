//! Replay protection for reflected envelopes.
//!
//! Every reflected envelope is identified by its encryption nonce. The
//! dispatcher asks the guard before applying an envelope and records the nonce
//! only after the content was durably applied, so a crash between the two
//! steps leads to a re-application instead of a loss.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use mdsync_crypto::NONCE_SIZE;

/// Envelope nonce.
pub type Nonce = [u8; NONCE_SIZE];

/// Ledger of applied envelope nonces.
pub trait NonceGuard: Send + Sync {
    /// Nonce was applied before.
    fn is_processed(&self, nonce: &Nonce) -> bool;

    /// Record a nonce after its content was applied.
    fn mark_processed(&self, nonce: Nonce);
}

/// In-memory nonce ledger. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct MemoryNonceGuard {
    seen: Arc<Mutex<HashSet<Nonce>>>,
}

impl MemoryNonceGuard {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded nonces.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// No nonce recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NonceGuard for MemoryNonceGuard {
    fn is_processed(&self, nonce: &Nonce) -> bool {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).contains(nonce)
    }

    fn mark_processed(&self, nonce: Nonce) {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).insert(nonce);
    }
}
