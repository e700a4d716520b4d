//! Per-device session state.
//!
//! The session owns the device id and the derived device group keys. Keys are
//! shared read-only behind an `Arc`; deactivating the session drops the
//! session's reference so new operations fail with `KeyUnavailable`.
//! Clones share the same key slot.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use mdsync_crypto::{DeviceGroupKeys, DeviceGroupSecret, NONCE_SIZE, nonce_of};
use mdsync_proto::{Envelope, EnvelopeContent};

use crate::{Environment, cipher, error::EnvelopeError};

/// Sealed envelope ready for a `Reflect` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    /// `nonce ‖ ciphertext`
    pub bytes: Bytes,
    /// Encryption nonce
    pub nonce: [u8; NONCE_SIZE],
}

/// Opened envelope from a `Reflected` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEnvelope {
    /// Decoded envelope
    pub envelope: Envelope,
    /// Encryption nonce, used for replay protection
    pub nonce: [u8; NONCE_SIZE],
}

/// Device id plus the device group keys of this device.
#[derive(Debug, Clone)]
pub struct Session {
    device_id: u64,
    keys: Arc<RwLock<Option<Arc<DeviceGroupKeys>>>>,
}

impl Session {
    /// Session without keys (multi-device not activated yet).
    pub fn new(device_id: u64) -> Self {
        Self { device_id, keys: Arc::new(RwLock::new(None)) }
    }

    /// Session with keys derived from `secret`.
    pub fn with_secret(device_id: u64, secret: &DeviceGroupSecret) -> Self {
        let session = Self::new(device_id);
        session.activate(secret);
        session
    }

    /// Mediator device id.
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Derive and install the device group keys, replacing any previous keys.
    pub fn activate(&self, secret: &DeviceGroupSecret) {
        let keys = Arc::new(DeviceGroupKeys::from_secret(secret));
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = Some(keys);
    }

    /// Drop the keys. Operations in flight keep their own reference until they
    /// finish.
    pub fn deactivate(&self) {
        self.keys.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Keys are installed.
    pub fn is_active(&self) -> bool {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Current keys.
    ///
    /// # Errors
    ///
    /// - `KeyUnavailable` before activation or after deactivation
    pub fn keys(&self) -> Result<Arc<DeviceGroupKeys>, EnvelopeError> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EnvelopeError::KeyUnavailable)
    }

    /// Wrap `content` in a padded envelope and seal it under the reflect key.
    ///
    /// # Errors
    ///
    /// - `KeyUnavailable` if the session holds no keys
    /// - `Encode` if the envelope cannot be serialized
    pub fn seal<E: Environment>(
        &self,
        env: &E,
        content: EnvelopeContent,
    ) -> Result<SealedEnvelope, EnvelopeError> {
        let keys = self.keys()?;
        let envelope = cipher::build(env, self.device_id, content);
        let nonce = env.random_nonce();
        let bytes = cipher::encrypt(&envelope, keys.reflect(), &nonce)?;

        Ok(SealedEnvelope { bytes: Bytes::from(bytes), nonce })
    }

    /// Open a sealed envelope.
    ///
    /// # Errors
    ///
    /// - `KeyUnavailable` if the session holds no keys
    /// - `DecryptionFailed` / `Decode` as in [`cipher::decrypt`]
    pub fn open(&self, data: &[u8]) -> Result<OpenedEnvelope, EnvelopeError> {
        let keys = self.keys()?;
        let nonce = nonce_of(data).ok_or(EnvelopeError::DecryptionFailed)?;
        let envelope = cipher::decrypt(data, keys.reflect())?;

        Ok(OpenedEnvelope { envelope, nonce })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use mdsync_proto::sync::{UserProfile, UserProfileSync};

    use super::*;

    #[derive(Clone)]
    struct FixedEnv(u8);

    impl Environment for FixedEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn wall_clock_millis(&self) -> u64 {
            0
        }

        async fn sleep(&self, _duration: Duration) {}

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(self.0);
        }
    }

    fn content() -> EnvelopeContent {
        EnvelopeContent::UserProfileSync(UserProfileSync::Update(UserProfile::default()))
    }

    #[test]
    fn seal_open_roundtrip() {
        let session = Session::with_secret(7, &DeviceGroupSecret::new([1; 32]));
        let env = FixedEnv(3);

        let sealed = session.seal(&env, content()).unwrap();
        assert_eq!(sealed.nonce, [3; 24]);

        let opened = session.open(&sealed.bytes).unwrap();
        assert_eq!(opened.nonce, sealed.nonce);
        assert_eq!(opened.envelope.device_id, 7);
        assert_eq!(opened.envelope.padding.len(), 3);
        assert_eq!(opened.envelope.content, content());
    }

    #[test]
    fn keys_unavailable_before_activation() {
        let session = Session::new(1);
        assert!(!session.is_active());
        assert_eq!(session.seal(&FixedEnv(0), content()), Err(EnvelopeError::KeyUnavailable));
        assert_eq!(session.open(&[0; 64]), Err(EnvelopeError::KeyUnavailable));
    }

    #[test]
    fn deactivate_is_shared_by_clones() {
        let session = Session::with_secret(1, &DeviceGroupSecret::new([1; 32]));
        let clone = session.clone();
        assert!(clone.is_active());

        session.deactivate();
        assert!(!clone.is_active());
        assert_eq!(clone.keys().unwrap_err(), EnvelopeError::KeyUnavailable);
    }

    #[test]
    fn foreign_group_cannot_open() {
        let ours = Session::with_secret(1, &DeviceGroupSecret::new([1; 32]));
        let theirs = Session::with_secret(2, &DeviceGroupSecret::new([2; 32]));

        let sealed = theirs.seal(&FixedEnv(5), content()).unwrap();
        assert_eq!(ours.open(&sealed.bytes), Err(EnvelopeError::DecryptionFailed));
    }
}
