//! Multi-device sync protocol core.
//!
//! Pure state machines with no I/O: the caller feeds frames in and executes the
//! returned actions. Time and randomness come from an injected
//! [`Environment`] so every component runs deterministically under
//! simulation.
//!
//! # Components
//!
//! - [`Session`]: the device id and derived device group keys
//! - [`cipher`]: envelope sealing and opening under the reflect key
//! - [`Handshake`]: `ServerHello` → `ClientHello` → `ServerInfo`
//! - [`TransactionCoordinator`]: begin/commit protocol for exclusive changes
//! - [`NonceGuard`]: at-most-once application of reflected envelopes
//! - [`ReflectTracker`]: correlates outgoing reflects with their acks

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;
pub mod config;
pub mod env;
pub mod error;
pub mod handshake;
pub mod nonce_guard;
pub mod reflect;
pub mod session;
pub mod transaction;

pub use config::HandshakeConfig;
pub use env::Environment;
pub use error::{EnvelopeError, HandshakeError, TransactionError};
pub use handshake::{CloseCode, Handshake, HandshakeAction, HandshakeEvent, HandshakeState};
pub use nonce_guard::{MemoryNonceGuard, Nonce, NonceGuard};
pub use reflect::ReflectTracker;
pub use session::{OpenedEnvelope, SealedEnvelope, Session};
pub use transaction::{TransactionCoordinator, TransactionEvent, TransactionState};
