//! Adversarial tests for backup encryption.

use proptest::prelude::*;
use regcache_crypto::{
    decrypt, derive_key, encrypt, generate_random_key, CryptoError, DerivedKey, EncryptedData,
    KdfParams, Salt, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};

// ── Round trip ──

#[test]
fn encrypt_then_decrypt_returns_plaintext() {
    let key = generate_random_key();
    let encrypted = encrypt(&key, b"snapshot body").unwrap();
    assert_eq!(decrypt(&key, &encrypted).unwrap(), b"snapshot body");
}

#[test]
fn ciphertext_includes_tag() {
    let key = generate_random_key();
    let encrypted = encrypt(&key, b"abc").unwrap();
    assert_eq!(encrypted.ciphertext.len(), 3 + TAG_SIZE);
}

#[test]
fn nonces_are_fresh_per_encryption() {
    let key = generate_random_key();
    let a = encrypt(&key, b"same").unwrap();
    let b = encrypt(&key, b"same").unwrap();
    assert_ne!(a.nonce, b.nonce);
}

// ── Wrong key / tampering ──

#[test]
fn decrypt_with_wrong_key_returns_error() {
    let encrypted = encrypt(&generate_random_key(), b"secret").unwrap();
    match decrypt(&generate_random_key(), &encrypted).unwrap_err() {
        CryptoError::Decryption(msg) => assert!(msg.contains("wrong key")),
        other => panic!("expected Decryption error, got: {other:?}"),
    }
}

#[test]
fn single_bit_flip_detected() {
    let key = generate_random_key();
    let mut encrypted = encrypt(&key, b"integrity-protected").unwrap();
    if let Some(byte) = encrypted.ciphertext.first_mut() {
        *byte ^= 0x01;
    }
    assert!(decrypt(&key, &encrypted).is_err());
}

#[test]
fn truncated_ciphertext_rejected() {
    let key = generate_random_key();
    let garbage = EncryptedData {
        nonce: [0u8; NONCE_SIZE],
        ciphertext: vec![1, 2, 3],
    };
    assert!(decrypt(&key, &garbage).is_err());
}

// ── Serialization ──

#[test]
fn encrypted_data_serializes_ciphertext_as_base64() {
    let key = generate_random_key();
    let encrypted = encrypt(&key, b"payload").unwrap();
    let json = serde_json::to_value(&encrypted).unwrap();
    assert!(json["ciphertext"].is_string());

    let back: EncryptedData = serde_json::from_value(json).unwrap();
    assert_eq!(decrypt(&key, &back).unwrap(), b"payload");
}

// ── Key derivation ──

#[test]
fn same_passphrase_and_salt_derive_same_key() {
    let salt = Salt::random();
    let params = KdfParams::insecure_for_tests();
    let a = derive_key("correct horse", &salt, &params).unwrap();
    let b = derive_key("correct horse", &salt, &params).unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn different_salt_derives_different_key() {
    let params = KdfParams::insecure_for_tests();
    let a = derive_key("pw", &Salt::random(), &params).unwrap();
    let b = derive_key("pw", &Salt::random(), &params).unwrap();
    assert_ne!(a.as_bytes(), b.as_bytes());
}

#[test]
fn from_slice_checks_length() {
    assert!(DerivedKey::from_slice(&[0u8; KEY_SIZE]).is_ok());
    match DerivedKey::from_slice(&[0u8; 5]).unwrap_err() {
        CryptoError::InvalidKeyLength { expected, actual } => {
            assert_eq!(expected, KEY_SIZE);
            assert_eq!(actual, 5);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn debug_does_not_leak_key_bytes() {
    let key = DerivedKey::from_bytes([0xAB; KEY_SIZE]);
    assert_eq!(format!("{key:?}"), "DerivedKey(..)");
}

proptest! {
    #[test]
    fn arbitrary_plaintexts_survive(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let key = generate_random_key();
        let encrypted = encrypt(&key, &data).unwrap();
        prop_assert_eq!(decrypt(&key, &encrypted).unwrap(), data);
    }
}
