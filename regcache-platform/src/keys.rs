//! Key files kept next to the database.

use crate::error::{PlatformError, PlatformResult};
use regcache_crypto::{generate_random_key, DerivedKey};
use std::path::Path;
use tracing::info;

pub(crate) const AUDIT_KEY_FILE: &str = "audit.key";
pub(crate) const BACKUP_KEY_FILE: &str = "backup.key";

/// Loads a hex-encoded 256-bit key from `path`, generating and saving one if
/// the file does not exist.
///
/// An unreadable or malformed file is an error rather than a reason to
/// regenerate: a new audit key would fail every existing checksum, and a new
/// backup key would orphan every existing blob.
pub(crate) fn load_or_create_key(path: &Path) -> PlatformResult<DerivedKey> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let bytes = hex::decode(contents.trim()).map_err(|e| PlatformError::KeyFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            DerivedKey::from_slice(&bytes).map_err(|e| PlatformError::KeyFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = generate_random_key();
            std::fs::write(path, hex::encode(key.as_bytes())).map_err(|source| {
                PlatformError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            info!("generated new key file {}", path.display());
            Ok(key)
        }
        Err(source) => Err(PlatformError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
