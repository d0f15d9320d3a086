//! Platform configuration, loaded from TOML.

use crate::error::ConfigError;
use regcache_cache::ResolverConfig;
use regcache_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DATABASE_FILE: &str = "regcache.duckdb";

/// Every key is optional; missing keys take the defaults below.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub sync_enabled: bool,
    pub sync_interval_seconds: u64,
    /// Confidential records never leave the device. Only `true` is accepted.
    pub confidential_excluded: bool,
    pub backup_retention_days: u32,
    pub push_batch_size: usize,
    pub pull_page_size: usize,
    pub request_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    /// Staging rows compared against the manifest digests on each refresh.
    pub verify_spot_checks: usize,
    pub data_dir: PathBuf,
    pub remote_base_url: Option<String>,
    /// Defaults to `<remoteBaseUrl>/health`.
    pub health_url: Option<String>,
    /// Defaults to `<dataDir>/file-cache`.
    pub file_cache_dir: Option<PathBuf>,
    /// Defaults to `<dataDir>/backups`.
    pub backup_dir: Option<PathBuf>,
    /// When set, backups are sealed with a key derived from this passphrase
    /// instead of the generated `backup.key`.
    pub backup_passphrase: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            sync_interval_seconds: 300,
            confidential_excluded: true,
            backup_retention_days: 30,
            push_batch_size: 100,
            pull_page_size: 500,
            request_timeout_seconds: 30,
            cache_ttl_seconds: 86_400,
            verify_spot_checks: 16,
            data_dir: PathBuf::from("data"),
            remote_base_url: None,
            health_url: None,
            file_cache_dir: None,
            backup_dir: None,
            backup_passphrase: None,
        }
    }
}

impl PlatformConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.confidential_excluded {
            return Err(ConfigError::invalid(
                "confidentialExcluded",
                "confidential records cannot be synced",
            ));
        }
        let positive = [
            ("syncIntervalSeconds", self.sync_interval_seconds),
            ("backupRetentionDays", u64::from(self.backup_retention_days)),
            ("pushBatchSize", self.push_batch_size as u64),
            ("pullPageSize", self.pull_page_size as u64),
            ("requestTimeoutSeconds", self.request_timeout_seconds),
            ("cacheTtlSeconds", self.cache_ttl_seconds),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("dataDir", "must not be empty"));
        }
        if matches!(&self.backup_passphrase, Some(p) if p.is_empty()) {
            return Err(ConfigError::invalid("backupPassphrase", "must not be empty"));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn file_cache_dir(&self) -> PathBuf {
        self.file_cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("file-cache"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }

    pub fn health_url(&self) -> Option<String> {
        self.health_url.clone().or_else(|| {
            self.remote_base_url
                .as_ref()
                .map(|base| format!("{}/health", base.trim_end_matches('/')))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            enabled: self.sync_enabled,
            push_batch_size: self.push_batch_size,
            pull_page_size: self.pull_page_size,
            request_timeout: self.request_timeout(),
            interval: Duration::from_secs(self.sync_interval_seconds),
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            ttl: Duration::from_secs(self.cache_ttl_seconds),
            request_timeout: self.request_timeout(),
        }
    }
}
