//! Cryptographic building blocks for multi-device synchronization.
//!
//! Pure functions with deterministic outputs. Callers provide nonces and other
//! random bytes so state machines stay testable.
//!
//! # Key Hierarchy
//!
//! Every device of a device group holds the same 32-byte secret. Five
//! independent sub-keys are derived from it, one per purpose:
//!
//! ```text
//! Device Group Secret (32 bytes)
//!        │
//!        ├── HKDF(salt "p")   → Path Key              (mediator authentication)
//!        ├── HKDF(salt "r")   → Reflect Key           (envelopes)
//!        ├── HKDF(salt "di")  → Device-Info Key       (per-device metadata)
//!        ├── HKDF(salt "sdd") → Shared-Device-Data Key
//!        └── HKDF(salt "ts")  → Transaction-Scope Key (lock reasons)
//! ```
//!
//! No sub-key is derived from another sub-key. Compromise of one purpose key
//! does not expose the others.
//!
//! # Security
//!
//! Confidentiality and integrity:
//! - XChaCha20-Poly1305 for every encrypted blob (`nonce ‖ ciphertext`)
//! - 24-byte random nonces make collisions negligible without counters
//! - Failed authentication tag -> reject, never partially decode
//!
//! Mediator authentication:
//! - The Path Key doubles as an X25519 secret scalar
//! - The mediator proves liveness with an ephemeral key and a challenge, the
//!   device answers with the challenge boxed under the shared secret
//!
//! Memory hygiene:
//! - Secrets and derived keys are zeroized on drop
//! - `Debug` output never contains key material

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod challenge;
pub mod error;
pub mod keys;
pub mod secretbox;

pub use challenge::{
    PUBLIC_KEY_SIZE, device_group_public_key, open_challenge_response, seal_challenge,
};
pub use error::CryptoError;
pub use keys::{DeviceGroupKeys, DeviceGroupSecret, KEY_SIZE, SubKey, SymmetricKey};
pub use secretbox::{NONCE_SIZE, TAG_SIZE, nonce_of, open, seal};
