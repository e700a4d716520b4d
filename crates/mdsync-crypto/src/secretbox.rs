//! Secret box using `XChaCha20-Poly1305` with `nonce ‖ ciphertext` framing.
//!
//! All functions are pure - the nonce must be provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CryptoError, keys::SymmetricKey};

/// Size of the `XChaCha20` nonce prefix (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` and prepend the nonce.
///
/// Output layout: `[nonce: 24][ciphertext + tag]`.
///
/// # Security
///
/// - Caller MUST provide a fresh random nonce per encryption in production
/// - Authenticated encryption prevents tampering
pub fn seal(key: &SymmetricKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(nonce);
    sealed.extend_from_slice(&ciphertext);
    sealed
}

/// Split the nonce prefix and decrypt the remainder.
///
/// # Errors
///
/// - `DecryptionFailed` if `sealed` is shorter than the nonce plus tag, or if
///   authentication fails (wrong key or tampered data)
pub fn open(key: &SymmetricKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::decryption(format!(
            "input too short: {} bytes, need at least {}",
            sealed.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::decryption("authentication failed"))
}

/// Nonce prefix of a sealed box, if present.
pub fn nonce_of(sealed: &[u8]) -> Option<[u8; NONCE_SIZE]> {
    sealed.get(..NONCE_SIZE).and_then(|prefix| prefix.try_into().ok())
}
