//! On-disk blob format.
//!
//! A blob is a JSON envelope holding the sealed payload. When the key comes
//! from a passphrase, the envelope also carries the salt and Argon2id
//! parameters so the passphrase alone can reopen it.

use crate::error::{BackupError, BackupResult};
use chrono::{DateTime, Utc};
use regcache_crypto::{
    decrypt, derive_key, encrypt, DerivedKey, EncryptedData, KdfParams, Salt,
};
use regcache_types::{InstanceLabel, Record};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const ENVELOPE_VERSION: u32 = 1;

/// Where backup keys come from.
#[derive(Clone)]
pub enum BackupKey {
    /// A key held by the host application.
    Raw(DerivedKey),
    /// An operator passphrase. Each blob gets a fresh salt.
    Passphrase { passphrase: String, params: KdfParams },
}

impl std::fmt::Debug for BackupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupKey::Raw(_) => f.write_str("BackupKey::Raw(..)"),
            BackupKey::Passphrase { params, .. } => {
                write!(f, "BackupKey::Passphrase {{ params: {params:?} }}")
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KdfHeader {
    salt: Salt,
    params: KdfParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kdf: Option<KdfHeader>,
    data: EncryptedData,
}

/// Plaintext contents of a blob.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BackupPayload {
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub source_instance: InstanceLabel,
    pub records: Vec<Record>,
}

pub(crate) fn content_hash(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}

/// Encrypts `plaintext` into envelope bytes.
pub(crate) fn seal(key: &BackupKey, plaintext: &[u8]) -> BackupResult<Vec<u8>> {
    let (derived, kdf) = match key {
        BackupKey::Raw(k) => (k.clone(), None),
        BackupKey::Passphrase { passphrase, params } => {
            let salt = Salt::random();
            let derived = derive_key(passphrase, &salt, params)?;
            (derived, Some(KdfHeader { salt, params: *params }))
        }
    };
    let envelope = Envelope {
        version: ENVELOPE_VERSION,
        kdf,
        data: encrypt(&derived, plaintext)?,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decrypts envelope bytes written by [`seal`].
pub(crate) fn open(key: &BackupKey, id: &str, bytes: &[u8]) -> BackupResult<Vec<u8>> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| BackupError::corrupt(id, format!("unreadable envelope: {e}")))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(BackupError::corrupt(
            id,
            format!("unsupported envelope version {}", envelope.version),
        ));
    }
    let derived = match (key, &envelope.kdf) {
        (BackupKey::Raw(k), None) => k.clone(),
        (BackupKey::Passphrase { passphrase, .. }, Some(header)) => {
            derive_key(passphrase, &header.salt, &header.params)?
        }
        (BackupKey::Raw(_), Some(_)) => {
            return Err(BackupError::corrupt(id, "blob is passphrase-protected"));
        }
        (BackupKey::Passphrase { .. }, None) => {
            return Err(BackupError::corrupt(id, "blob was sealed with a raw key"));
        }
    };
    Ok(decrypt(&derived, &envelope.data)?)
}
