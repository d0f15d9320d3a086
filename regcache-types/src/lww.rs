use crate::{Record, RemoteRecord};

/// Outcome of comparing a remote copy against the local row with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LwwDecision {
    /// No local row exists.
    Insert,
    /// Remote is at least as new as local; local is discarded.
    TakeRemote,
    /// Local is strictly newer; remote is discarded.
    KeepLocal,
}

/// Last-write-wins on `updated_at`. Ties go to the remote.
///
/// The losing version is dropped whole; there is no field-level merge.
pub fn resolve_lww(local: Option<&Record>, remote: &RemoteRecord) -> LwwDecision {
    match local {
        None => LwwDecision::Insert,
        Some(local) if remote.updated_at >= local.updated_at => LwwDecision::TakeRemote,
        Some(_) => LwwDecision::KeepLocal,
    }
}
