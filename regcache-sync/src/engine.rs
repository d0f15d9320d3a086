//! Push/pull reconciliation.

use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::probe::ConnectivityProbe;
use crate::remote::{RejectReason, RemoteSource};
use crate::state::{EngineStatus, SyncErrorEntry, SyncState};
use chrono::{DateTime, Utc};
use regcache_storage::{ApplyOutcome, LocalStore, StorageResult};
use regcache_types::{Record, RemoteRecord};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Actor recorded in the audit log for rows applied by a pull.
pub const SYNC_ACTOR: &str = "sync";

/// Notifications for UI subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StatusChanged { status: EngineStatus },
    PushCompleted { pushed: usize, rejected: usize },
    PullCompleted { pulled: usize },
    /// A local change lost to a newer (or equally new) remote version.
    ConflictResolved {
        id: String,
        local_updated_at: Option<DateTime<Utc>>,
        remote_updated_at: DateTime<Utc>,
    },
}

/// Why a run did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Disabled,
    Offline,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub conflicts_resolved: usize,
    /// Per-record failures that did not stop the run.
    pub errors: Vec<SyncErrorEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(SyncReport),
    /// The run stopped early; progress made before `error` is kept.
    Failed {
        report: SyncReport,
        error: SyncErrorEntry,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phases {
    Both,
    PushOnly,
    PullOnly,
}

impl Phases {
    fn push(self) -> bool {
        matches!(self, Phases::Both | Phases::PushOnly)
    }

    fn pull(self) -> bool {
        matches!(self, Phases::Both | Phases::PullOnly)
    }
}

/// Reconciles the Local Store with the remote backend.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteSource>,
    probe: Arc<dyn ConnectivityProbe>,
    config: SyncConfig,
    /// Guards the in-flight flag and every other state field.
    state: Arc<Mutex<SyncState>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Loads persisted state. A run that was in flight when the process died
    /// is recorded as interrupted.
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteSource>,
        probe: Arc<dyn ConnectivityProbe>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let mut state = SyncState::load(&store)?;
        if state.status == EngineStatus::Syncing {
            warn!("previous sync run did not finish; marking it interrupted");
            state.status = EngineStatus::Error;
            state.record_error(SyncErrorEntry::interrupted());
        }
        state.pending_push_count = store.count_pending_push()?;
        state.persist(&store)?;

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            store,
            remote,
            probe,
            config,
            state: Arc::new(Mutex::new(state)),
            events,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub fn get_state(&self) -> SyncResult<SyncState> {
        let state = self
            .state
            .lock()
            .map_err(|_| SyncError::Internal("sync state lock poisoned".into()))?;
        Ok(state.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Runs push then pull.
    pub async fn trigger(&self) -> SyncOutcome {
        self.run(Phases::Both).await
    }

    /// Runs only the push phase, under the same guards as [`trigger`](Self::trigger).
    pub async fn push(&self) -> SyncOutcome {
        self.run(Phases::PushOnly).await
    }

    /// Runs only the pull phase, under the same guards as [`trigger`](Self::trigger).
    pub async fn pull(&self) -> SyncOutcome {
        self.run(Phases::PullOnly).await
    }

    async fn run(&self, phases: Phases) -> SyncOutcome {
        let enabled = self.config.enabled;
        let begin = self
            .update_state(move |s| {
                if !enabled {
                    return Err(SkipReason::Disabled);
                }
                if s.status == EngineStatus::Syncing {
                    return Err(SkipReason::AlreadyRunning);
                }
                s.status = EngineStatus::Syncing;
                Ok(s.last_sync_at)
            })
            .await;

        let since = match begin {
            Ok(Ok(since)) => since,
            Ok(Err(reason)) => {
                debug!("sync skipped: {reason:?}");
                return SyncOutcome::Skipped(reason);
            }
            Err(e) => {
                warn!("could not start sync: {e}");
                return SyncOutcome::Failed {
                    report: SyncReport::default(),
                    error: SyncErrorEntry::from(&e),
                };
            }
        };
        self.emit(SyncEvent::StatusChanged {
            status: EngineStatus::Syncing,
        });

        if !self.probe_reachable().await {
            info!("remote unreachable; sync deferred");
            self.finish_offline().await;
            return SyncOutcome::Skipped(SkipReason::Offline);
        }

        let mut report = SyncReport::default();
        let mut cutoff = None;
        let mut result = Ok(());
        if phases.push() {
            result = self.push_phase(&mut report).await;
        }
        if result.is_ok() && phases.pull() {
            result = self.pull_phase(since, &mut report).await.map(|c| cutoff = c);
        }

        self.finish(report, result.err(), cutoff).await
    }

    // ── Push ──

    async fn push_phase(&self, report: &mut SyncReport) -> SyncResult<()> {
        let pending = self.blocking(|s| s.pending_for_push()).await?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!("pushing {} pending records", pending.len());

        let mut rejected = 0usize;
        for batch in pending.chunks(self.config.push_batch_size.max(1)) {
            let wire: Vec<RemoteRecord> = batch.iter().filter_map(Record::to_remote).collect();
            let ack = self.bounded(self.remote.batch_upsert(&wire)).await?;

            let batch = batch.to_vec();
            let accepted = ack.accepted.clone();
            let rejections = ack.rejected.clone();
            let (marked, errors, conflicts) = self
                .blocking(move |store| {
                    let mut marked = 0usize;
                    let mut errors = Vec::new();
                    let mut conflicts = 0usize;
                    for id in &accepted {
                        let Some(record) = batch.iter().find(|r| &r.id == id) else {
                            continue;
                        };
                        if store.mark_clean(id, record.updated_at)? {
                            marked += 1;
                        } else {
                            debug!("record {id} changed during push; left pending");
                        }
                    }
                    for rejection in &rejections {
                        let Some(record) = batch.iter().find(|r| r.id == rejection.id) else {
                            continue;
                        };
                        match &rejection.reason {
                            RejectReason::Conflict => {
                                store.mark_conflict(&record.id, record.updated_at)?;
                                conflicts += 1;
                            }
                            RejectReason::Invalid(reason) => {
                                errors.push(SyncError::Rejected {
                                    id: record.id.clone(),
                                    reason: reason.clone(),
                                });
                            }
                        }
                    }
                    Ok((marked, errors, conflicts))
                })
                .await?;

            report.pushed += marked;
            rejected += errors.len() + conflicts;
            for e in &errors {
                warn!("{e}");
                report.errors.push(SyncErrorEntry::from(e));
            }
            if conflicts > 0 {
                info!("{conflicts} pushed records conflicted; the pull resolves them");
            }
        }

        self.emit(SyncEvent::PushCompleted {
            pushed: report.pushed,
            rejected,
        });
        Ok(())
    }

    // ── Pull ──

    /// Returns the newest cutoff seen, if the remote reported one.
    async fn pull_phase(
        &self,
        since: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        let mut cursor = since;
        let mut newest = None;
        loop {
            let page = self
                .bounded(
                    self.remote
                        .list_changed_since(cursor, self.config.pull_page_size.max(1)),
                )
                .await?;
            let records = page.records;
            let page_len = records.len();

            let outcomes = self
                .blocking(move |store| -> StorageResult<Vec<(RemoteRecord, Option<DateTime<Utc>>, ApplyOutcome)>> {
                    let mut out = Vec::with_capacity(records.len());
                    for remote in records {
                        let local_updated_at = store.get(&remote.id)?.map(|r| r.updated_at);
                        let outcome = store.apply_remote(&remote, SYNC_ACTOR)?;
                        out.push((remote, local_updated_at, outcome));
                    }
                    Ok(out)
                })
                .await?;

            for (remote, local_updated_at, outcome) in outcomes {
                if outcome.entry.is_some() {
                    report.pulled += 1;
                }
                if outcome.overwrote_local_change() {
                    report.conflicts_resolved += 1;
                    debug!("{}", SyncError::Conflict { id: remote.id.clone() });
                    self.emit(SyncEvent::ConflictResolved {
                        id: remote.id,
                        local_updated_at,
                        remote_updated_at: remote.updated_at,
                    });
                }
            }

            let advanced = page.cutoff.filter(|&c| cursor.is_none_or(|cur| c > cur));
            if let Some(cutoff) = advanced {
                cursor = Some(cutoff);
                newest = Some(cutoff);
            }
            if !page.has_more || page_len == 0 {
                break;
            }
            // Asking again with the same cursor would return the same page.
            if advanced.is_none() {
                return Err(RemoteError::Protocol(format!(
                    "remote reported more changes without advancing past {cursor:?}"
                ))
                .into());
            }
        }

        self.emit(SyncEvent::PullCompleted {
            pulled: report.pulled,
        });
        Ok(newest)
    }

    // ── State transitions ──

    async fn finish(
        &self,
        report: SyncReport,
        failure: Option<SyncError>,
        cutoff: Option<DateTime<Utc>>,
    ) -> SyncOutcome {
        let pending = self.blocking(|s| s.count_pending_push()).await.ok();
        let failure = failure.as_ref().map(|e| {
            warn!("sync run failed: {e}");
            SyncErrorEntry::from(e)
        });

        let entry = failure.clone();
        let row_errors = report.errors.clone();
        let updated = self
            .update_state(move |s| {
                if let Some(c) = cutoff {
                    s.last_sync_at = Some(c);
                }
                if let Some(count) = pending {
                    s.pending_push_count = count;
                }
                if entry.is_none() && row_errors.is_empty() {
                    s.error_history.clear();
                    s.status = EngineStatus::Idle;
                } else {
                    for e in row_errors.into_iter().chain(entry) {
                        s.record_error(e);
                    }
                    s.status = EngineStatus::Error;
                }
                s.status
            })
            .await;

        match updated {
            Ok(status) => self.emit(SyncEvent::StatusChanged { status }),
            Err(e) => self.settle_unpersisted(EngineStatus::Error, &e),
        }
        info!(
            pushed = report.pushed,
            pulled = report.pulled,
            conflicts = report.conflicts_resolved,
            errors = report.errors.len(),
            "sync run finished"
        );

        match failure {
            Some(error) => SyncOutcome::Failed { report, error },
            None => SyncOutcome::Completed(report),
        }
    }

    async fn finish_offline(&self) {
        match self
            .update_state(|s| s.status = EngineStatus::Offline)
            .await
        {
            Ok(()) => self.emit(SyncEvent::StatusChanged {
                status: EngineStatus::Offline,
            }),
            Err(e) => self.settle_unpersisted(EngineStatus::Offline, &e),
        }
    }

    /// Ends a run whose final state could not be written.
    ///
    /// The in-memory status still leaves `syncing`, so later triggers are not
    /// refused as already running.
    fn settle_unpersisted(&self, status: EngineStatus, error: &SyncError) {
        warn!("could not persist sync state: {error}");
        match self.state.lock() {
            Ok(mut state) => {
                state.status = status;
                state.record_error(SyncErrorEntry::from(error));
            }
            Err(_) => warn!("sync state lock poisoned"),
        }
        self.emit(SyncEvent::StatusChanged { status });
    }

    // ── Helpers ──

    /// Mutates state under its lock and persists it before releasing the lock.
    async fn update_state<R, F>(&self, f: F) -> SyncResult<R>
    where
        F: FnOnce(&mut SyncState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state
                .lock()
                .map_err(|_| SyncError::Internal("sync state lock poisoned".into()))?;
            mutate_persisted(&mut guard, f, |s| s.persist(&store))
        })
        .await?
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    async fn probe_reachable(&self) -> bool {
        tokio::time::timeout(self.config.request_timeout, self.probe.is_reachable())
            .await
            .unwrap_or(false)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Applies `f` and persists the result. If persisting fails the state is
/// restored to what it was before `f` ran.
fn mutate_persisted<R>(
    state: &mut SyncState,
    f: impl FnOnce(&mut SyncState) -> R,
    persist: impl FnOnce(&SyncState) -> SyncResult<()>,
) -> SyncResult<R> {
    let before = state.clone();
    let r = f(state);
    if let Err(e) = persist(state) {
        *state = before;
        return Err(e);
    }
    Ok(r)
}
