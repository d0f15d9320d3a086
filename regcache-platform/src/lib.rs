//! The assembled regcache platform.
//!
//! [`Platform`] opens the Local Store under the configured data directory and
//! wires the sync engine, update coordinator, backup manager and read-path
//! resolver around it. Host applications hold one `Platform` per process.

pub mod config;
mod error;
mod keys;
pub mod telemetry;

pub use config::PlatformConfig;
pub use error::{ConfigError, PlatformError, PlatformResult};

use regcache_backup::{BackupKey, BackupManager};
use regcache_cache::{FileCache, ReadResolver};
use regcache_crypto::KdfParams;
use regcache_storage::{AuditLog, LocalStore};
use regcache_sync::{
    ConnectivityProbe, HttpConnectivityProbe, HttpRemoteSource, RemoteSource, SchedulerHandle,
    SyncEngine, SyncScheduler,
};
use regcache_update::UpdateCoordinator;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct Platform {
    config: PlatformConfig,
    store: LocalStore,
    sync: Arc<SyncEngine>,
    update: Arc<UpdateCoordinator>,
    backup: BackupManager,
    resolver: ReadResolver,
}

impl Platform {
    /// Opens the platform against the HTTP remote named by `remoteBaseUrl`.
    pub fn open(config: PlatformConfig) -> PlatformResult<Self> {
        config.validate()?;
        let base_url = config.remote_base_url.clone().ok_or_else(|| {
            ConfigError::invalid("remoteBaseUrl", "required for the HTTP remote")
        })?;
        let timeout = config.request_timeout();
        let remote = Arc::new(HttpRemoteSource::new(&base_url, timeout)?);
        let health_url = config
            .health_url()
            .unwrap_or_else(|| format!("{}/health", base_url.trim_end_matches('/')));
        let probe = Arc::new(HttpConnectivityProbe::new(&health_url, timeout)?);
        Self::open_with(config, remote, probe)
    }

    /// Opens the platform with caller-supplied remote collaborators.
    pub fn open_with(
        config: PlatformConfig,
        remote: Arc<dyn RemoteSource>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> PlatformResult<Self> {
        config.validate()?;
        create_dir(&config.data_dir)?;
        let secret = keys::load_or_create_key(&config.data_dir.join(keys::AUDIT_KEY_FILE))?;
        let store = LocalStore::open(&config.database_path(), secret.as_bytes())?;
        info!("opened local store at {}", config.database_path().display());
        Self::assemble(config, store, remote, probe)
    }

    /// Wires every component around an already-open store.
    pub fn assemble(
        config: PlatformConfig,
        store: LocalStore,
        remote: Arc<dyn RemoteSource>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> PlatformResult<Self> {
        config.validate()?;
        let sync = Arc::new(SyncEngine::new(
            store.clone(),
            Arc::clone(&remote),
            probe,
            config.sync_config(),
        )?);
        let update = Arc::new(UpdateCoordinator::new(
            store.clone(),
            config.verify_spot_checks,
        ));

        let backup_key = match &config.backup_passphrase {
            Some(passphrase) => BackupKey::Passphrase {
                passphrase: passphrase.clone(),
                params: KdfParams::default(),
            },
            None => {
                create_dir(&config.data_dir)?;
                BackupKey::Raw(keys::load_or_create_key(
                    &config.data_dir.join(keys::BACKUP_KEY_FILE),
                )?)
            }
        };
        let backup = BackupManager::new(
            store.clone(),
            Arc::clone(&update),
            backup_key,
            config.backup_dir(),
            config.backup_retention_days,
        );
        let resolver = ReadResolver::new(
            store.clone(),
            FileCache::new(config.file_cache_dir()),
            remote,
            config.resolver_config(),
        );

        Ok(Self {
            config,
            store,
            sync,
            update,
            backup,
            resolver,
        })
    }

    /// Starts periodic sync. Returns `None` when sync is disabled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sync_scheduler(&self) -> Option<SchedulerHandle> {
        if !self.config.sync_enabled {
            info!("sync disabled; scheduler not started");
            return None;
        }
        let interval = self.sync.config().interval;
        Some(SyncScheduler::start(Arc::clone(&self.sync), interval))
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditLog {
        self.store.audit()
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn update(&self) -> &Arc<UpdateCoordinator> {
        &self.update
    }

    pub fn backup(&self) -> &BackupManager {
        &self.backup
    }

    pub fn resolver(&self) -> &ReadResolver {
        &self.resolver
    }
}

fn create_dir(path: &Path) -> PlatformResult<()> {
    std::fs::create_dir_all(path).map_err(|source| PlatformError::Io {
        path: path.to_path_buf(),
        source,
    })
}
