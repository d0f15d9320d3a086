//! Encryption layer for regcache.
//!
//! Provides authenticated encryption for backup snapshots using:
//! - Argon2id for key derivation from passphrases
//! - ChaCha20-Poly1305 for authenticated encryption
//! - Secure key handling with zeroization
//!
//! # Architecture
//!
//! A backup key is either derived from an operator passphrase (the salt is
//! stored next to each blob so the passphrase is the only secret needed) or
//! generated randomly and held by the host application. Each encryption uses
//! a fresh random nonce, so the same key can protect any number of blobs.

mod cipher;
mod error;
mod key;

pub use cipher::{decrypt, encrypt, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
