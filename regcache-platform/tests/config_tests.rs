use pretty_assertions::assert_eq;
use regcache_platform::{ConfigError, PlatformConfig};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn empty_file_yields_defaults() {
    let config = PlatformConfig::from_toml_str("").unwrap();
    assert_eq!(config, PlatformConfig::default());
    assert!(config.sync_enabled);
    assert_eq!(config.sync_interval_seconds, 300);
    assert!(config.confidential_excluded);
    assert_eq!(config.backup_retention_days, 30);
    assert_eq!(config.push_batch_size, 100);
    assert_eq!(config.pull_page_size, 500);
    assert_eq!(config.request_timeout_seconds, 30);
    assert_eq!(config.cache_ttl_seconds, 86_400);
    assert_eq!(config.verify_spot_checks, 16);
    assert_eq!(config.data_dir, PathBuf::from("data"));
    assert_eq!(config.remote_base_url, None);
}

#[test]
fn camel_case_keys_override_defaults() {
    let config = PlatformConfig::from_toml_str(
        r#"
        syncEnabled = false
        syncIntervalSeconds = 60
        pushBatchSize = 25
        pullPageSize = 1000
        requestTimeoutSeconds = 5
        cacheTtlSeconds = 600
        verifySpotChecks = 0
        backupRetentionDays = 7
        dataDir = "/var/lib/regcache"
        remoteBaseUrl = "https://regs.example.com/api/"
        "#,
    )
    .unwrap();

    assert!(!config.sync_enabled);
    assert_eq!(config.verify_spot_checks, 0);
    assert_eq!(config.backup_retention_days, 7);

    let sync = config.sync_config();
    assert!(!sync.enabled);
    assert_eq!(sync.interval, Duration::from_secs(60));
    assert_eq!(sync.push_batch_size, 25);
    assert_eq!(sync.pull_page_size, 1000);
    assert_eq!(sync.request_timeout, Duration::from_secs(5));

    let resolver = config.resolver_config();
    assert_eq!(resolver.ttl, Duration::from_secs(600));

    assert_eq!(
        config.database_path(),
        PathBuf::from("/var/lib/regcache/regcache.duckdb")
    );
    assert_eq!(config.file_cache_dir(), PathBuf::from("/var/lib/regcache/file-cache"));
    assert_eq!(config.backup_dir(), PathBuf::from("/var/lib/regcache/backups"));
    assert_eq!(
        config.health_url().as_deref(),
        Some("https://regs.example.com/api/health")
    );
}

#[test]
fn explicit_directories_win() {
    let config = PlatformConfig::from_toml_str(
        r#"
        fileCacheDir = "/tmp/fc"
        backupDir = "/mnt/backups"
        healthUrl = "https://status.example.com/ping"
        "#,
    )
    .unwrap();
    assert_eq!(config.file_cache_dir(), PathBuf::from("/tmp/fc"));
    assert_eq!(config.backup_dir(), PathBuf::from("/mnt/backups"));
    assert_eq!(
        config.health_url().as_deref(),
        Some("https://status.example.com/ping")
    );
}

#[test]
fn syncing_confidential_records_is_rejected() {
    let err = PlatformConfig::from_toml_str("confidentialExcluded = false").unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            key: "confidentialExcluded",
            ..
        }
    ));
}

#[test]
fn zero_sizes_and_intervals_are_rejected() {
    for (line, key) in [
        ("syncIntervalSeconds = 0", "syncIntervalSeconds"),
        ("pushBatchSize = 0", "pushBatchSize"),
        ("pullPageSize = 0", "pullPageSize"),
        ("requestTimeoutSeconds = 0", "requestTimeoutSeconds"),
        ("cacheTtlSeconds = 0", "cacheTtlSeconds"),
        ("backupRetentionDays = 0", "backupRetentionDays"),
    ] {
        match PlatformConfig::from_toml_str(line) {
            Err(ConfigError::Invalid { key: got, .. }) => assert_eq!(got, key),
            other => panic!("{line}: expected rejection, got {other:?}"),
        }
    }
}

#[test]
fn unknown_keys_and_bad_types_fail_to_parse() {
    assert!(matches!(
        PlatformConfig::from_toml_str("syncEnabeld = true"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        PlatformConfig::from_toml_str("pushBatchSize = \"ten\""),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn load_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regcache.toml");
    std::fs::write(&path, "pullPageSize = 42\n").unwrap();

    assert_eq!(PlatformConfig::load(&path).unwrap().pull_page_size, 42);
    assert!(matches!(
        PlatformConfig::load(&dir.path().join("absent.toml")),
        Err(ConfigError::Io { .. })
    ));
}
