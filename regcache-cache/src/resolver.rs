use crate::error::{CacheError, CacheResult};
use crate::file_cache::{FileCache, FileEntry};
use chrono::{DateTime, Utc};
use regcache_storage::{LocalStore, StorageResult};
use regcache_sync::{RemoteError, RemoteSource};
use regcache_types::{time::now, Record, RemoteRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Audit actor for Local Store back-fills.
pub const READ_PATH_ACTOR: &str = "read-path";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    File,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    /// Past its TTL, served because the remote was unreachable.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub record: Record,
    pub tier: Tier,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    pub ttl: Duration,
    pub request_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(86_400),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Tiered lookup: Local Store, then file cache, then remote.
///
/// Hits in a slower tier are written back to the faster ones. Write-back
/// failures are logged and never fail the read.
pub struct ReadResolver {
    store: LocalStore,
    files: FileCache,
    remote: Arc<dyn RemoteSource>,
    config: ResolverConfig,
}

impl ReadResolver {
    pub fn new(
        store: LocalStore,
        files: FileCache,
        remote: Arc<dyn RemoteSource>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            files,
            remote,
            config,
        }
    }

    pub fn file_cache(&self) -> &FileCache {
        &self.files
    }

    /// Resolves `key`. `Ok(None)` means the remote confirmed it does not exist.
    pub async fn read(&self, key: &str) -> CacheResult<Option<ReadOutcome>> {
        let mut stale: Option<ReadOutcome> = None;

        let lookup = key.to_string();
        let local = self.blocking(move |store| store.get_cached(&lookup)).await?;
        // Back-fill keeps the local flag, so slower-tier copies are served with it too.
        let confidential = local.as_ref().is_some_and(|c| c.record.confidential);
        if let Some(cached) = local {
            // Unsynced rows are the local source of truth.
            if !cached.record.is_clean() || self.is_fresh(cached.cached_at) {
                return Ok(Some(ReadOutcome {
                    record: cached.record,
                    tier: Tier::Local,
                    freshness: Freshness::Fresh,
                }));
            }
            stale = Some(ReadOutcome {
                record: cached.record,
                tier: Tier::Local,
                freshness: Freshness::Stale,
            });
        }

        if let Some(entry) = self.read_file(key).await {
            let record = served(entry.record.clone(), confidential);
            if self.is_fresh(entry.stored_at) {
                self.backfill_local(&entry.record).await;
                return Ok(Some(ReadOutcome {
                    record,
                    tier: Tier::File,
                    freshness: Freshness::Fresh,
                }));
            }
            let newer = stale
                .as_ref()
                .is_none_or(|s| record.updated_at > s.record.updated_at);
            if newer {
                stale = Some(ReadOutcome {
                    record,
                    tier: Tier::File,
                    freshness: Freshness::Stale,
                });
            }
        }

        match self.fetch(key).await {
            Ok(Some(remote)) => {
                if let Err(e) = self.files.put(key, &remote).await {
                    warn!("could not populate file cache for {key}: {e}");
                }
                self.backfill_local(&remote).await;
                Ok(Some(ReadOutcome {
                    record: served(remote, confidential),
                    tier: Tier::Remote,
                    freshness: Freshness::Fresh,
                }))
            }
            Ok(None) => {
                debug!("{key} not found remotely");
                Ok(None)
            }
            Err(e) => match stale {
                Some(outcome) => {
                    warn!("remote unavailable ({e}); serving stale {key} from {:?}", outcome.tier);
                    Ok(Some(outcome))
                }
                None => Err(CacheError::Unavailable {
                    key: key.to_string(),
                    source: e,
                }),
            },
        }
    }

    fn is_fresh(&self, at: DateTime<Utc>) -> bool {
        // A timestamp in the future (clock skew) reads as fresh.
        (now() - at).to_std().map_or(true, |age| age < self.config.ttl)
    }

    async fn read_file(&self, key: &str) -> Option<FileEntry> {
        match self.files.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("file cache read failed for {key}: {e}");
                None
            }
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        tokio::time::timeout(self.config.request_timeout, self.remote.fetch_record(key))
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }

    async fn backfill_local(&self, remote: &RemoteRecord) {
        let record = remote.clone();
        let applied = self
            .blocking(move |store| store.apply_remote(&record, READ_PATH_ACTOR))
            .await;
        if let Err(e) = applied {
            warn!("could not back-fill local store with {}: {e}", remote.id);
        }
    }

    async fn blocking<T, F>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce(&LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }
}

/// A remote copy as the application sees it, carrying the local confidential flag.
fn served(remote: RemoteRecord, confidential: bool) -> Record {
    let mut record = Record::from_remote(remote);
    record.confidential = confidential;
    record
}
