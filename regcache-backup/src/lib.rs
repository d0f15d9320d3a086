//! Encrypted backups of the Local Store.
//!
//! A backup is the full contents of the active instance, serialized to JSON,
//! sealed with ChaCha20-Poly1305 and written atomically to the backup
//! directory. Metadata lives in the `backups` table and is recorded only once
//! the blob is in place. Restores go through the update coordinator, so a
//! restore is verified and cut over like any other refresh.

mod envelope;
mod error;
mod manager;

pub use envelope::BackupKey;
pub use error::{BackupError, BackupResult};
pub use manager::{BackupManager, RestoreReport, RESTORE_ACTOR};
