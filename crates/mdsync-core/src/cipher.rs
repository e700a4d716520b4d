//! Envelope encryption.
//!
//! Envelopes are CBOR-encoded and sealed with XChaCha20-Poly1305 under the
//! reflect key. The wire form is `nonce ‖ ciphertext`; the nonce doubles as
//! the replay-protection key for the nonce guard.

use mdsync_crypto::{NONCE_SIZE, SymmetricKey, secretbox};
use mdsync_proto::{Envelope, EnvelopeContent};

use crate::{Environment, error::EnvelopeError};

/// Seal an envelope with the given nonce.
pub fn encrypt(
    envelope: &Envelope,
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
) -> Result<Vec<u8>, EnvelopeError> {
    let plaintext = envelope.encode().map_err(EnvelopeError::Encode)?;
    Ok(secretbox::seal(key, nonce, &plaintext))
}

/// Open and decode a sealed envelope.
///
/// # Errors
///
/// - `DecryptionFailed` if `data` is shorter than a nonce, truncated, or fails
///   authentication
/// - `Decode` if the plaintext is not an envelope
pub fn decrypt(data: &[u8], key: &SymmetricKey) -> Result<Envelope, EnvelopeError> {
    if data.len() < NONCE_SIZE {
        return Err(EnvelopeError::DecryptionFailed);
    }

    let plaintext = secretbox::open(key, data).map_err(|_| EnvelopeError::DecryptionFailed)?;
    Envelope::decode(&plaintext).map_err(EnvelopeError::Decode)
}

/// Build an envelope with random padding of `0..=MAX_PADDING` bytes.
pub fn build<E: Environment>(env: &E, device_id: u64, content: EnvelopeContent) -> Envelope {
    let mut len = [0u8; 1];
    env.random_bytes(&mut len);
    let mut padding = vec![0u8; usize::from(len[0]) % (Envelope::MAX_PADDING + 1)];
    env.random_bytes(&mut padding);

    Envelope { padding, device_id, content }
}

#[cfg(test)]
mod tests {
    use mdsync_proto::sync::{Settings, SettingsSync};

    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            padding: vec![1, 2, 3],
            device_id: 99,
            content: EnvelopeContent::SettingsSync(SettingsSync::Update(Settings::default())),
        }
    }

    #[test]
    fn seal_and_open() {
        let key = SymmetricKey::new([4; 32]);
        let sealed = encrypt(&envelope(), &key, &[9; 24]).unwrap();
        assert_eq!(&sealed[..24], &[9; 24]);
        assert_eq!(decrypt(&sealed, &key).unwrap(), envelope());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = encrypt(&envelope(), &SymmetricKey::new([4; 32]), &[9; 24]).unwrap();
        assert_eq!(
            decrypt(&sealed, &SymmetricKey::new([5; 32])),
            Err(EnvelopeError::DecryptionFailed)
        );
    }

    #[test]
    fn shorter_than_nonce_fails() {
        assert_eq!(
            decrypt(&[0; 23], &SymmetricKey::new([4; 32])),
            Err(EnvelopeError::DecryptionFailed)
        );
    }

    #[test]
    fn sealed_garbage_is_decode_error() {
        let key = SymmetricKey::new([4; 32]);
        let sealed = secretbox::seal(&key, &[1; 24], &[0xff, 0xff]);
        assert!(matches!(decrypt(&sealed, &key), Err(EnvelopeError::Decode(_))));
    }
}
