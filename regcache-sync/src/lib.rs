//! Opportunistic synchronization between the Local Store and the remote backend.
//!
//! The engine owns all network I/O; the Local Store stays the source of truth
//! and keeps serving while a run is in flight. Each run pushes pending local
//! writes first and then pulls remote changes, resolving collisions by
//! last-write-wins on `updated_at`.
//!
//! - [`SyncEngine`]: one reconciliation pass per [`SyncEngine::trigger`] call
//! - [`SyncScheduler`]: background task that triggers the engine on an interval
//! - [`RemoteSource`] / [`ConnectivityProbe`]: the collaborator seams, with
//!   HTTP implementations in [`http`]

mod config;
mod engine;
mod error;
pub mod http;
mod probe;
mod remote;
mod scheduler;
mod state;

pub use config::SyncConfig;
pub use engine::{SkipReason, SyncEngine, SyncEvent, SyncOutcome, SyncReport};
pub use error::{RemoteError, SyncError, SyncResult};
pub use probe::{ConnectivityProbe, StaticProbe};
pub use remote::{ChangeSet, RejectReason, Rejection, RemoteSource, UpsertAck};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use state::{EngineStatus, SyncErrorEntry, SyncErrorKind, SyncState};
