//! Device group secret and derived sub-keys.

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of the device group secret and of every derived key.
pub const KEY_SIZE: usize = 32;

/// Personalization shared by all sub-key derivations.
const PERSONALIZATION: &[u8] = b"3ma-mdev";

/// Root secret of a device group.
///
/// Owned by secure local storage. Zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceGroupSecret([u8; KEY_SIZE]);

impl DeviceGroupSecret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a secret from an arbitrary slice.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if `bytes` is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DeviceGroupSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceGroupSecret").field(&"<redacted>").finish()
    }
}

/// A 32-byte symmetric key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey(<redacted {KEY_SIZE} bytes>)")
    }
}

/// Purpose of a derived sub-key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubKey {
    /// Authenticates the device towards the mediator
    Path,
    /// Encrypts reflected envelopes
    Reflect,
    /// Encrypts per-device metadata
    DeviceInfo,
    /// Encrypts data shared by all devices via the mediator
    SharedDeviceData,
    /// Encrypts the reason byte of a transaction lock
    TransactionScope,
}

impl SubKey {
    /// All sub-keys in derivation order.
    pub const ALL: [Self; 5] = [
        Self::Path,
        Self::Reflect,
        Self::DeviceInfo,
        Self::SharedDeviceData,
        Self::TransactionScope,
    ];

    /// Domain separation salt of this sub-key.
    pub const fn salt(self) -> &'static [u8] {
        match self {
            Self::Path => b"p",
            Self::Reflect => b"r",
            Self::DeviceInfo => b"di",
            Self::SharedDeviceData => b"sdd",
            Self::TransactionScope => b"ts",
        }
    }
}

/// The five keys derived from one [`DeviceGroupSecret`].
///
/// Read-only after derivation. Share it behind an `Arc` between concurrent
/// handlers; drop it to destroy the keys.
///
/// # Invariants
///
/// - Every key is an independent HKDF output of the secret with its own salt
/// - Deriving twice from the same secret yields identical keys
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceGroupKeys {
    path: SymmetricKey,
    reflect: SymmetricKey,
    device_info: SymmetricKey,
    shared_device_data: SymmetricKey,
    transaction_scope: SymmetricKey,
}

impl DeviceGroupKeys {
    /// Derive all sub-keys from raw secret bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if `secret` is not exactly 32 bytes
    pub fn derive(secret: &[u8]) -> Result<Self, CryptoError> {
        let secret = DeviceGroupSecret::from_slice(secret)?;
        Ok(Self::from_secret(&secret))
    }

    /// Derive all sub-keys from a validated secret.
    pub fn from_secret(secret: &DeviceGroupSecret) -> Self {
        Self {
            path: derive_sub_key(secret, SubKey::Path),
            reflect: derive_sub_key(secret, SubKey::Reflect),
            device_info: derive_sub_key(secret, SubKey::DeviceInfo),
            shared_device_data: derive_sub_key(secret, SubKey::SharedDeviceData),
            transaction_scope: derive_sub_key(secret, SubKey::TransactionScope),
        }
    }

    /// Key for the given purpose.
    pub fn key(&self, sub_key: SubKey) -> &SymmetricKey {
        match sub_key {
            SubKey::Path => &self.path,
            SubKey::Reflect => &self.reflect,
            SubKey::DeviceInfo => &self.device_info,
            SubKey::SharedDeviceData => &self.shared_device_data,
            SubKey::TransactionScope => &self.transaction_scope,
        }
    }

    /// Path key.
    pub fn path(&self) -> &SymmetricKey {
        &self.path
    }

    /// Reflect key.
    pub fn reflect(&self) -> &SymmetricKey {
        &self.reflect
    }

    /// Device-info key.
    pub fn device_info(&self) -> &SymmetricKey {
        &self.device_info
    }

    /// Shared-device-data key.
    pub fn shared_device_data(&self) -> &SymmetricKey {
        &self.shared_device_data
    }

    /// Transaction-scope key.
    pub fn transaction_scope(&self) -> &SymmetricKey {
        &self.transaction_scope
    }
}

fn derive_sub_key(secret: &DeviceGroupSecret, sub_key: SubKey) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(Some(sub_key.salt()), secret.as_bytes());

    let mut okm = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(PERSONALIZATION, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let key = SymmetricKey::new(okm);
    okm.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> [u8; KEY_SIZE] {
        let mut bytes = [0u8; KEY_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = i as u8;
        }
        bytes
    }

    #[test]
    fn derive_is_deterministic() {
        let a = DeviceGroupKeys::derive(&secret()).unwrap();
        let b = DeviceGroupKeys::derive(&secret()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sub_keys_are_pairwise_distinct() {
        let keys = DeviceGroupKeys::derive(&secret()).unwrap();
        for (i, a) in SubKey::ALL.iter().enumerate() {
            for b in &SubKey::ALL[i + 1..] {
                assert_ne!(keys.key(*a), keys.key(*b), "{a:?} and {b:?} collide");
            }
        }
    }

    #[test]
    fn rejects_short_secret() {
        let err = DeviceGroupKeys::derive(&[0u8; 31]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength { expected: 32, actual: 31 });
    }

    #[test]
    fn rejects_long_secret() {
        let err = DeviceGroupKeys::derive(&[0u8; 33]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength { expected: 32, actual: 33 });
    }

    #[test]
    fn accessors_match_key_lookup() {
        let keys = DeviceGroupKeys::derive(&secret()).unwrap();
        assert_eq!(keys.path(), keys.key(SubKey::Path));
        assert_eq!(keys.reflect(), keys.key(SubKey::Reflect));
        assert_eq!(keys.device_info(), keys.key(SubKey::DeviceInfo));
        assert_eq!(keys.shared_device_data(), keys.key(SubKey::SharedDeviceData));
        assert_eq!(keys.transaction_scope(), keys.key(SubKey::TransactionScope));
    }

    #[test]
    fn debug_output_is_redacted() {
        let keys = DeviceGroupKeys::derive(&secret()).unwrap();
        let rendered = format!("{keys:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains(&format!("{:?}", keys.path().as_bytes())));

        let secret = DeviceGroupSecret::new(secret());
        assert_eq!(format!("{secret:?}"), "DeviceGroupSecret(\"<redacted>\")");
    }
}
