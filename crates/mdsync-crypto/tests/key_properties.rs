//! Property-based tests for device group key derivation and secret boxes.

use mdsync_crypto::{DeviceGroupKeys, NONCE_SIZE, SubKey, SymmetricKey, open, seal};
use proptest::prelude::*;

fn arbitrary_secret() -> impl Strategy<Value = [u8; 32]> {
    prop::array::uniform32(any::<u8>())
}

#[test]
fn prop_derive_is_deterministic() {
    proptest!(|(secret in arbitrary_secret())| {
        let a = DeviceGroupKeys::derive(&secret).expect("32-byte secret");
        let b = DeviceGroupKeys::derive(&secret).expect("32-byte secret");

        // PROPERTY: same secret, same keys
        prop_assert_eq!(a, b);
    });
}

#[test]
fn prop_single_bit_flip_changes_every_sub_key() {
    proptest!(|(secret in arbitrary_secret(), bit in 0usize..256)| {
        let mut flipped = secret;
        flipped[bit / 8] ^= 1 << (bit % 8);

        let original = DeviceGroupKeys::derive(&secret).expect("32-byte secret");
        let changed = DeviceGroupKeys::derive(&flipped).expect("32-byte secret");

        // PROPERTY: no sub-key survives a change of the secret
        for sub_key in SubKey::ALL {
            prop_assert_ne!(
                original.key(sub_key),
                changed.key(sub_key),
                "{:?} unchanged after flipping bit {}",
                sub_key,
                bit
            );
        }
    });
}

#[test]
fn prop_wrong_length_secrets_are_rejected() {
    proptest!(|(secret in prop::collection::vec(any::<u8>(), 0..64))| {
        prop_assume!(secret.len() != 32);
        prop_assert!(DeviceGroupKeys::derive(&secret).is_err());
    });
}

#[test]
fn prop_seal_open_roundtrip() {
    proptest!(|(
        key in prop::array::uniform32(any::<u8>()),
        nonce in prop::array::uniform24(any::<u8>()),
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
    )| {
        let key = SymmetricKey::new(key);
        let sealed = seal(&key, &nonce, &plaintext);

        prop_assert_eq!(&sealed[..NONCE_SIZE], &nonce[..]);
        prop_assert_eq!(open(&key, &sealed).expect("roundtrip"), plaintext);
    });
}
