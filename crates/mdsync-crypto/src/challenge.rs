//! Challenge box for the mediator handshake.
//!
//! The mediator sends an ephemeral X25519 public key and a random challenge.
//! The device treats its Path Key as an X25519 secret scalar, computes the
//! shared secret with the mediator's ephemeral key, and returns the challenge
//! sealed under a key derived from that shared secret. The mediator knows the
//! device group's public key and verifies the response with its ephemeral
//! secret.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    keys::{KEY_SIZE, SymmetricKey},
    secretbox::{self, NONCE_SIZE},
};

/// Size of an X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// HKDF info for the challenge box key.
const CHALLENGE_INFO: &[u8] = b"3ma-mdev-hello";

/// Public key of the device group, derived from the Path Key.
///
/// This is the identity the mediator authenticates devices against.
pub fn device_group_public_key(path_key: &SymmetricKey) -> [u8; PUBLIC_KEY_SIZE] {
    let secret = StaticSecret::from(*path_key.as_bytes());
    *PublicKey::from(&secret).as_bytes()
}

/// Seal the mediator's challenge for the ClientHello response.
///
/// Output layout: `[nonce: 24][ciphertext + tag]`.
pub fn seal_challenge(
    path_key: &SymmetricKey,
    server_ephemeral_public: &[u8; PUBLIC_KEY_SIZE],
    challenge: &[u8],
    nonce: &[u8; NONCE_SIZE],
) -> Vec<u8> {
    let secret = StaticSecret::from(*path_key.as_bytes());
    let shared = secret.diffie_hellman(&PublicKey::from(*server_ephemeral_public));
    let box_key = box_key(shared.as_bytes());

    secretbox::seal(&box_key, nonce, challenge)
}

/// Open a ClientHello response on the mediator side.
///
/// # Errors
///
/// - `DecryptionFailed` if the response was not produced by the holder of the
///   device group's Path Key, or is truncated
pub fn open_challenge_response(
    server_ephemeral_secret: &[u8; KEY_SIZE],
    device_group_public: &[u8; PUBLIC_KEY_SIZE],
    response: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let secret = StaticSecret::from(*server_ephemeral_secret);
    let shared = secret.diffie_hellman(&PublicKey::from(*device_group_public));
    let box_key = box_key(shared.as_bytes());

    secretbox::open(&box_key, response)
}

fn box_key(shared: &[u8; KEY_SIZE]) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(None, shared);

    let mut okm = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(CHALLENGE_INFO, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let key = SymmetricKey::new(okm);
    okm.zeroize();
    key
}
