//! In-memory collaborators for engine tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use regcache_storage::LocalStore;
use regcache_sync::{
    ChangeSet, RejectReason, Rejection, RemoteError, RemoteSource, StaticProbe, SyncConfig,
    SyncEngine, UpsertAck,
};
use regcache_types::{Record, RemoteRecord};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SECRET: &[u8] = b"sync-test-secret";

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(secs)
}

pub fn local(id: &str, secs: i64) -> Record {
    Record::new(id, json!({ "id": id, "origin": "local", "rev": secs }), t(secs))
}

pub fn remote(id: &str, secs: i64) -> RemoteRecord {
    RemoteRecord::new(id, json!({ "id": id, "origin": "remote", "rev": secs }), t(secs))
}

/// Remote backend keeping records in memory.
///
/// Pushes older than the stored copy are rejected as conflicts.
#[derive(Default)]
pub struct FakeRemote {
    records: Mutex<BTreeMap<String, RemoteRecord>>,
    offline: AtomicBool,
    stalled_cursor: AtomicBool,
    invalid_ids: Mutex<HashSet<String>>,
    upsert_delay: Mutex<Duration>,
    /// Every batch received, in order.
    pub batches: Mutex<Vec<Vec<RemoteRecord>>>,
    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, record: RemoteRecord) {
        self.records.lock().unwrap().insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<RemoteRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Serve pages that claim more changes but report no cutoff.
    pub fn set_stalled_cursor(&self, stalled: bool) {
        self.stalled_cursor.store(stalled, Ordering::SeqCst);
    }

    pub fn reject_as_invalid(&self, id: &str) {
        self.invalid_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn set_upsert_delay(&self, delay: Duration) {
        *self.upsert_delay.lock().unwrap() = delay;
    }

    pub fn pushed_ids(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|r| r.id.clone())
            .collect()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn list_changed_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<ChangeSet, RemoteError> {
        self.check_online()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let mut changed: Vec<RemoteRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| since.is_none_or(|s| r.updated_at > s))
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));

        let mut page: Vec<RemoteRecord> = Vec::new();
        let mut has_more = false;
        for r in changed {
            let splits_tie = page.last().is_some_and(|l| l.updated_at == r.updated_at);
            if page.len() >= limit && !splits_tie {
                has_more = true;
                break;
            }
            page.push(r);
        }
        let cutoff = page.last().map(|r| r.updated_at);
        if self.stalled_cursor.load(Ordering::SeqCst) {
            return Ok(ChangeSet {
                records: page,
                cutoff: None,
                has_more: true,
            });
        }
        Ok(ChangeSet {
            records: page,
            cutoff,
            has_more,
        })
    }

    async fn batch_upsert(&self, records: &[RemoteRecord]) -> Result<UpsertAck, RemoteError> {
        let delay = *self.upsert_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_online()?;
        self.batches.lock().unwrap().push(records.to_vec());

        let invalid = self.invalid_ids.lock().unwrap().clone();
        let mut stored = self.records.lock().unwrap();
        let mut ack = UpsertAck::default();
        for record in records {
            if invalid.contains(&record.id) {
                ack.rejected.push(Rejection {
                    id: record.id.clone(),
                    reason: RejectReason::Invalid("schema violation".into()),
                });
                continue;
            }
            match stored.get(&record.id) {
                Some(existing) if existing.updated_at > record.updated_at => {
                    ack.rejected.push(Rejection {
                        id: record.id.clone(),
                        reason: RejectReason::Conflict,
                    });
                }
                _ => {
                    stored.insert(record.id.clone(), record.clone());
                    ack.accepted.push(record.id.clone());
                }
            }
        }
        Ok(ack)
    }

    async fn fetch_record(&self, id: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        self.check_online()?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(id))
    }
}

pub struct Harness {
    pub store: LocalStore,
    pub remote: Arc<FakeRemote>,
    pub probe: Arc<StaticProbe>,
    pub engine: Arc<SyncEngine>,
}

pub fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> Harness {
    let store = LocalStore::open_in_memory(SECRET).unwrap();
    harness_on(store, config)
}

pub fn harness_on(store: LocalStore, config: SyncConfig) -> Harness {
    let remote = FakeRemote::new();
    let probe = Arc::new(StaticProbe::new(true));
    let engine = Arc::new(
        SyncEngine::new(store.clone(), remote.clone(), probe.clone(), config).unwrap(),
    );
    Harness {
        store,
        remote,
        probe,
        engine,
    }
}
