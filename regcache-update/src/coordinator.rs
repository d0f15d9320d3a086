//! The refresh state machine.

use crate::error::{CutoverError, UpdateError, UpdateResult, VerificationError};
use crate::health::{HealthCheck, RowCountHealthCheck};
use crate::source::{BulkSource, Manifest};
use regcache_storage::{CarryForward, LocalStore, StorageError, StorageResult};
use regcache_types::{payload_digest, InstanceLabel};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Coordinator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Steady,
    Refreshing,
    CuttingOver,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Steady => "STEADY",
            Phase::Refreshing => "REFRESHING",
            Phase::CuttingOver => "CUTTING_OVER",
        })
    }
}

/// Actor recorded for rows changed by a cutover or rollback.
pub const UPDATE_ACTOR: &str = "update-coordinator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Copy the active instance's unsynced rows into staging after the load.
    ///
    /// When set, cutover is refused if the active instance took audited
    /// writes after the copy.
    pub carry_forward_pending: bool,
    /// Audit actor for the rows the cutover changes.
    pub actor: &'static str,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            carry_forward_pending: true,
            actor: UPDATE_ACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub staging: InstanceLabel,
    pub loaded: usize,
    pub carried_forward: usize,
    /// Carried rows whose id the snapshot did not contain.
    pub carried_new: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub staging: InstanceLabel,
    pub row_count: u64,
    pub spot_checked: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoverReport {
    pub previous: InstanceLabel,
    pub active: InstanceLabel,
}

/// Notifications for UI subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    RefreshStarted { staging: InstanceLabel },
    StagingLoaded { staging: InstanceLabel, rows: usize },
    StagingVerified { staging: InstanceLabel },
    RefreshAborted { staging: InstanceLabel, reason: String },
    CutoverCompleted { previous: InstanceLabel, active: InstanceLabel },
    RolledBack { active: InstanceLabel },
}

struct Loaded {
    manifest: Manifest,
    carried: CarryForward,
}

struct Inner {
    phase: Phase,
    staging: Option<InstanceLabel>,
    options: RefreshOptions,
    loading: bool,
    loaded: Option<Loaded>,
    verified: bool,
    /// Instance that served before the last cutover, while it can still be restored.
    rollback_to: Option<InstanceLabel>,
}

impl Inner {
    fn reset(&mut self) {
        self.phase = Phase::Steady;
        self.staging = None;
        self.loading = false;
        self.loaded = None;
        self.verified = false;
    }
}

/// Drives refreshes of the inactive instance and cutovers between instances.
pub struct UpdateCoordinator {
    store: LocalStore,
    spot_checks: usize,
    health: Arc<dyn HealthCheck>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<UpdateEvent>,
}

impl UpdateCoordinator {
    pub fn new(store: LocalStore, spot_checks: usize) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            spot_checks,
            health: Arc::new(RowCountHealthCheck),
            inner: Mutex::new(Inner {
                phase: Phase::Steady,
                staging: None,
                options: RefreshOptions::default(),
                loading: false,
                loaded: None,
                verified: false,
                rollback_to: None,
            }),
            events,
        }
    }

    pub fn with_health_check(mut self, health: Arc<dyn HealthCheck>) -> Self {
        self.health = health;
        self
    }

    pub fn phase(&self) -> UpdateResult<Phase> {
        Ok(self.lock()?.phase)
    }

    /// Whether [`rollback`](Self::rollback) currently has a target.
    pub fn can_roll_back(&self) -> UpdateResult<bool> {
        Ok(self.lock()?.rollback_to.is_some())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.events.subscribe()
    }

    /// STEADY → REFRESHING. Returns the staging instance.
    ///
    /// Forfeits rollback of the previous cutover: its instance becomes staging.
    pub fn begin_refresh(&self, options: RefreshOptions) -> UpdateResult<InstanceLabel> {
        let staging = self.store.active_instance()?.other();
        {
            let mut inner = self.lock()?;
            if inner.phase != Phase::Steady {
                return Err(invalid("begin_refresh", inner.phase));
            }
            inner.phase = Phase::Refreshing;
            inner.staging = Some(staging);
            inner.options = options;
            inner.loading = false;
            inner.loaded = None;
            inner.verified = false;
            inner.rollback_to = None;
        }
        info!("refresh started, staging instance {staging}");
        self.emit(UpdateEvent::RefreshStarted { staging });
        Ok(staging)
    }

    /// Clears staging and fills it from `source`. Any failure aborts the refresh.
    pub async fn load_staging(&self, source: &dyn BulkSource) -> UpdateResult<LoadReport> {
        let (staging, options) = {
            let mut inner = self.lock()?;
            let staging = match (inner.phase, inner.staging) {
                (Phase::Refreshing, Some(s)) if !inner.loading && inner.loaded.is_none() => s,
                (phase, _) => return Err(invalid("load_staging", phase)),
            };
            inner.loading = true;
            (staging, inner.options)
        };

        match self.populate(staging, options, source).await {
            Ok((report, loaded)) => {
                {
                    let mut inner = self.lock()?;
                    inner.loading = false;
                    inner.loaded = Some(loaded);
                }
                info!(
                    "staging {staging} loaded: {} rows, {} carried forward",
                    report.loaded, report.carried_forward
                );
                self.emit(UpdateEvent::StagingLoaded {
                    staging,
                    rows: report.loaded,
                });
                Ok(report)
            }
            Err(e) => {
                self.abort_with(staging, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn populate(
        &self,
        staging: InstanceLabel,
        options: RefreshOptions,
        source: &dyn BulkSource,
    ) -> UpdateResult<(LoadReport, Loaded)> {
        let snapshot = source.read_snapshot().await?;
        let manifest = snapshot.manifest;
        let records = snapshot.records;

        let (loaded, carried) = self
            .blocking(move |store| {
                store.clear_instance(staging)?;
                let loaded = store.load_instance(staging, &records)?;
                let carried = if options.carry_forward_pending {
                    store.carry_forward(staging)?
                } else {
                    CarryForward::default()
                };
                Ok((loaded, carried))
            })
            .await?;

        let report = LoadReport {
            staging,
            loaded,
            carried_forward: carried.rows.len(),
            carried_new: carried.new_ids.len(),
        };
        Ok((report, Loaded { manifest, carried }))
    }

    /// Checks staging against the manifest. Failure aborts the refresh.
    pub async fn verify_staging(&self) -> UpdateResult<VerificationReport> {
        let (staging, expected, samples) = {
            let inner = self.lock()?;
            match (inner.phase, inner.staging, &inner.loaded) {
                (Phase::Refreshing, Some(staging), Some(loaded)) if !inner.verified => {
                    let expected = loaded.manifest.row_count + loaded.carried.new_ids.len() as u64;
                    let samples = spot_check_sample(loaded, self.spot_checks);
                    (staging, expected, samples)
                }
                (phase, _, _) => return Err(invalid("verify_staging", phase)),
            }
        };

        let sample_count = samples.len();
        let checked = self
            .blocking(move |store| {
                let actual = store.count_rows(staging)?;
                if actual != expected {
                    return Ok(Err(VerificationError::RowCount { expected, actual }));
                }
                for (id, digest) in &samples {
                    let Some(record) = store.get_from(staging, id)? else {
                        return Ok(Err(VerificationError::MissingRow { id: id.clone() }));
                    };
                    let staged = payload_digest(&record.payload)?;
                    if &staged != digest {
                        return Ok(Err(VerificationError::DigestMismatch { id: id.clone() }));
                    }
                }
                Ok(Ok(actual))
            })
            .await;

        match checked {
            Ok(Ok(row_count)) => {
                self.lock()?.verified = true;
                info!("staging {staging} verified: {row_count} rows, {sample_count} spot checks");
                self.emit(UpdateEvent::StagingVerified { staging });
                Ok(VerificationReport {
                    staging,
                    row_count,
                    spot_checked: sample_count,
                })
            }
            Ok(Err(failure)) => {
                warn!("staging {staging} failed verification: {failure}");
                self.abort_with(staging, &failure.to_string()).await;
                Err(failure.into())
            }
            Err(e) => {
                self.abort_with(staging, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Repoints serving traffic to the verified staging instance.
    pub async fn cutover(&self) -> UpdateResult<CutoverReport> {
        let (staging, guard, actor, expected_rows) = {
            let mut inner = self.lock()?;
            let ready = inner.phase == Phase::Refreshing && inner.verified;
            let (Some(staging), Some(loaded), true) = (inner.staging, &inner.loaded, ready) else {
                return Err(invalid("cutover", inner.phase));
            };
            let guard = inner
                .options
                .carry_forward_pending
                .then_some(loaded.carried.audit_mark);
            let expected = loaded.manifest.row_count + loaded.carried.new_ids.len() as u64;
            let actor = inner.options.actor;
            inner.phase = Phase::CuttingOver;
            (staging, guard, actor, expected)
        };
        let previous = staging.other();

        let switched = self
            .blocking(move |store| match guard {
                Some(since) => store.switch_active_unless_changed(staging, actor, since),
                None => store.switch_active(staging, actor),
            })
            .await;
        if let Err(e) = switched {
            self.lock()?.phase = Phase::Refreshing;
            return Err(match e {
                UpdateError::Storage(StorageError::ActiveChanged { ids, .. }) => {
                    warn!("cutover refused: {} rows changed after carry-forward", ids.len());
                    CutoverError::ActiveDiverged { ids }.into()
                }
                UpdateError::Storage(s) => {
                    error!("cutover switch failed: {s}");
                    CutoverError::Switch(s).into()
                }
                other => other,
            });
        }

        let health = Arc::clone(&self.health);
        let healthy = self
            .blocking(move |store| Ok(health.check(store, staging, expected_rows)))
            .await
            .unwrap_or_else(|e| Err(e.to_string()));

        if let Err(reason) = healthy {
            error!("post-cutover health check failed: {reason}; rolling back");
            let restored = self
                .blocking(move |store| store.switch_active(previous, actor))
                .await;
            self.lock()?.reset();
            let rolled_back = match restored {
                Ok(_) => {
                    self.emit(UpdateEvent::RolledBack { active: previous });
                    true
                }
                Err(e) => {
                    error!("automatic rollback to {previous} failed: {e}");
                    false
                }
            };
            return Err(CutoverError::HealthCheckFailed {
                reason,
                rolled_back,
            }
            .into());
        }

        {
            let mut inner = self.lock()?;
            inner.reset();
            inner.rollback_to = Some(previous);
        }
        info!("cutover complete: {previous} -> {staging}");
        self.emit(UpdateEvent::CutoverCompleted {
            previous,
            active: staging,
        });
        Ok(CutoverReport {
            previous,
            active: staging,
        })
    }

    /// Restores the instance that served before the last cutover.
    pub async fn rollback(&self) -> UpdateResult<InstanceLabel> {
        let target = {
            let inner = self.lock()?;
            if inner.phase != Phase::Steady {
                return Err(invalid("rollback", inner.phase));
            }
            inner.rollback_to.ok_or(UpdateError::NothingToRollBack)?
        };
        self.blocking(move |store| store.switch_active(target, UPDATE_ACTOR))
            .await?;
        self.lock()?.rollback_to = None;
        info!("rolled back to instance {target}");
        self.emit(UpdateEvent::RolledBack { active: target });
        Ok(target)
    }

    /// Operator abort from REFRESHING. Not allowed while a load is running.
    pub async fn abort_refresh(&self) -> UpdateResult<()> {
        let staging = {
            let inner = self.lock()?;
            match (inner.phase, inner.staging) {
                (Phase::Refreshing, Some(s)) if !inner.loading => s,
                (phase, _) => return Err(invalid("abort_refresh", phase)),
            }
        };
        self.abort_with(staging, "aborted by operator").await;
        Ok(())
    }

    /// Runs begin, load, verify and cutover in order.
    pub async fn refresh(
        &self,
        source: &dyn BulkSource,
        options: RefreshOptions,
    ) -> UpdateResult<CutoverReport> {
        self.begin_refresh(options)?;
        self.load_staging(source).await?;
        self.verify_staging().await?;
        let result = self.cutover().await;
        if let Err(e) = &result {
            // A refused cutover leaves the refresh open; nobody else will close it here.
            if self.phase()? == Phase::Refreshing {
                let staging = self.store.active_instance()?.other();
                self.abort_with(staging, &e.to_string()).await;
            }
        }
        result
    }

    /// Discards staging and returns to STEADY.
    async fn abort_with(&self, staging: InstanceLabel, reason: &str) {
        if let Err(e) = self.blocking(move |store| store.clear_instance(staging)).await {
            warn!("could not clear staging {staging} after abort: {e}");
        }
        match self.lock() {
            Ok(mut inner) => inner.reset(),
            Err(e) => error!("{e}"),
        }
        info!("refresh aborted: {reason}");
        self.emit(UpdateEvent::RefreshAborted {
            staging,
            reason: reason.to_string(),
        });
    }

    async fn blocking<T, F>(&self, f: F) -> UpdateResult<T>
    where
        F: FnOnce(&LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    fn lock(&self) -> UpdateResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| UpdateError::Internal("coordinator state lock poisoned".into()))
    }

    fn emit(&self, event: UpdateEvent) {
        let _ = self.events.send(event);
    }
}

fn invalid(operation: &'static str, phase: Phase) -> UpdateError {
    UpdateError::InvalidTransition { operation, phase }
}

/// Evenly spaced manifest entries, skipping rows overwritten by carry-forward.
fn spot_check_sample(loaded: &Loaded, wanted: usize) -> Vec<(String, String)> {
    let carried: HashSet<&str> = loaded.carried.rows.iter().map(|r| r.id.as_str()).collect();
    let eligible: Vec<(&String, &String)> = loaded
        .manifest
        .digests
        .iter()
        .filter(|(id, _)| !carried.contains(id.as_str()))
        .collect();
    if wanted == 0 || eligible.is_empty() {
        return Vec::new();
    }
    let take = wanted.min(eligible.len());
    let stride = eligible.len() / take;
    (0..take)
        .map(|i| {
            let (id, digest) = eligible[i * stride];
            (id.clone(), digest.clone())
        })
        .collect()
}
