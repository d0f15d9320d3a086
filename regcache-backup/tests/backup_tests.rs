use chrono::Duration;
use pretty_assertions::assert_eq;
use regcache_backup::{BackupError, BackupKey, BackupManager, RESTORE_ACTOR};
use regcache_crypto::{generate_random_key, DerivedKey, KdfParams};
use regcache_storage::LocalStore;
use regcache_types::{time::now, AuditEventType, InstanceLabel, Record, RemoteRecord};
use regcache_update::UpdateCoordinator;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SECRET: &[u8] = b"backup-test-secret";

struct Fixture {
    store: LocalStore,
    coordinator: Arc<UpdateCoordinator>,
    dir: TempDir,
    key: DerivedKey,
}

impl Fixture {
    fn new() -> Self {
        let store = LocalStore::open_in_memory(SECRET).unwrap();
        let coordinator = Arc::new(UpdateCoordinator::new(store.clone(), 8));
        Self {
            store,
            coordinator,
            dir: tempfile::tempdir().unwrap(),
            key: generate_random_key(),
        }
    }

    fn manager(&self, retention_days: u32) -> BackupManager {
        self.manager_with(BackupKey::Raw(self.key.clone()), retention_days)
    }

    fn manager_with(&self, key: BackupKey, retention_days: u32) -> BackupManager {
        BackupManager::new(
            self.store.clone(),
            Arc::clone(&self.coordinator),
            key,
            self.dir.path(),
            retention_days,
        )
    }

    fn seed(&self, ids: &[&str]) {
        for (i, id) in ids.iter().enumerate() {
            let remote = RemoteRecord::new(
                *id,
                json!({ "id": id, "title": format!("Regulation {id}") }),
                now() - Duration::minutes(i as i64 + 1),
            );
            self.store.apply_remote(&remote, "seed").unwrap();
        }
    }
}

fn blob_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn create_writes_blob_then_metadata() {
    let fx = Fixture::new();
    fx.seed(&["r1", "r2", "r3"]);
    let manager = fx.manager(30);

    let snapshot = manager.create().await.unwrap();

    assert_eq!(snapshot.row_count, 3);
    assert_eq!(snapshot.source_instance, InstanceLabel::A);
    assert_eq!(snapshot.retention_until, snapshot.created_at + Duration::days(30));
    assert_eq!(snapshot.encrypted_blob_ref, format!("{}.enc", snapshot.id));
    assert_eq!(snapshot.content_hash.len(), 64);
    assert_eq!(blob_files(fx.dir.path()), vec![snapshot.encrypted_blob_ref.clone()]);
    assert_eq!(manager.list().await.unwrap(), vec![snapshot]);
}

#[tokio::test]
async fn blob_does_not_contain_plaintext() {
    let fx = Fixture::new();
    fx.seed(&["secret-regulation"]);
    let snapshot = fx.manager(30).create().await.unwrap();

    let bytes = std::fs::read(fx.dir.path().join(&snapshot.encrypted_blob_ref)).unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(!text.contains("secret-regulation"));
    assert!(!text.contains("Regulation"));
}

#[tokio::test]
async fn restore_returns_store_to_snapshot_contents() {
    let fx = Fixture::new();
    fx.seed(&["r1", "r2"]);
    let manager = fx.manager(30);
    let before_r1 = fx.store.get("r1").unwrap().unwrap();
    let before_r2 = fx.store.get("r2").unwrap().unwrap();
    let snapshot = manager.create().await.unwrap();

    fx.store
        .put(&Record::new("r1", json!({ "edited": true }), now()), "tester")
        .unwrap();
    fx.store.delete("r2", "tester").unwrap();
    fx.store
        .put(&Record::new("r3", json!({ "new": true }), now()), "tester")
        .unwrap();

    let report = manager.restore(&snapshot.id).await.unwrap();

    assert_eq!(report.snapshot_id, snapshot.id);
    assert_eq!(report.rows, 2);
    assert_eq!(report.cutover.previous, InstanceLabel::A);
    assert_eq!(report.cutover.active, InstanceLabel::B);
    assert_eq!(fx.store.get("r1").unwrap().unwrap(), before_r1);
    assert_eq!(fx.store.get("r2").unwrap().unwrap(), before_r2);
    assert!(fx.store.get("r3").unwrap().is_none());

    // The restore is an ordinary cutover and can be undone.
    fx.coordinator.rollback().await.unwrap();
    assert!(fx.store.get("r3").unwrap().is_some());
}

#[tokio::test]
async fn restore_is_recorded_in_the_audit_log() {
    let fx = Fixture::new();
    fx.seed(&["r1", "r2"]);
    let manager = fx.manager(30);
    let snapshot = manager.create().await.unwrap();

    fx.store
        .put(&Record::new("r1", json!({ "edited": true }), now()), "tester")
        .unwrap();
    fx.store.delete("r2", "tester").unwrap();
    fx.store
        .put(&Record::new("r3", json!({ "new": true }), now()), "tester")
        .unwrap();
    let before = fx.store.audit().head().unwrap().unwrap().sequence_number;

    manager.restore(&snapshot.id).await.unwrap();

    let entries = fx.store.audit().entries(before + 1..=i64::MAX).unwrap();
    let changes: Vec<(&str, AuditEventType)> = entries
        .iter()
        .map(|e| (e.record_id.as_str(), e.event_type))
        .collect();
    assert_eq!(
        changes,
        vec![
            ("r1", AuditEventType::Update),
            ("r2", AuditEventType::Insert),
            ("r3", AuditEventType::Delete),
        ]
    );
    assert!(entries.iter().all(|e| e.actor == RESTORE_ACTOR));
    assert!(fx.store.audit().verify_integrity(None).unwrap().is_intact());
}

#[tokio::test]
async fn tampered_blob_is_refused_and_active_untouched() {
    let fx = Fixture::new();
    fx.seed(&["r1"]);
    let manager = fx.manager(30);
    let snapshot = manager.create().await.unwrap();

    let path = fx.dir.path().join(&snapshot.encrypted_blob_ref);
    let mut envelope: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let ciphertext = envelope["data"]["ciphertext"].as_str().unwrap().to_string();
    let flipped = if ciphertext.starts_with('A') { "B" } else { "A" };
    envelope["data"]["ciphertext"] = json!(format!("{flipped}{}", &ciphertext[1..]));
    std::fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

    let err = manager.restore(&snapshot.id).await.unwrap_err();
    assert!(matches!(err, BackupError::Crypto(_)), "got {err}");
    assert_eq!(fx.store.active_instance().unwrap(), InstanceLabel::A);
}

#[tokio::test]
async fn wrong_key_cannot_restore() {
    let fx = Fixture::new();
    fx.seed(&["r1"]);
    let snapshot = fx.manager(30).create().await.unwrap();

    let other = fx.manager_with(BackupKey::Raw(generate_random_key()), 30);
    assert!(matches!(
        other.restore(&snapshot.id).await,
        Err(BackupError::Crypto(_))
    ));
}

#[tokio::test]
async fn passphrase_backups_restore_with_the_passphrase_alone() {
    let fx = Fixture::new();
    fx.seed(&["r1", "r2"]);
    let key = || BackupKey::Passphrase {
        passphrase: "open sesame".into(),
        params: KdfParams::insecure_for_tests(),
    };
    let snapshot = fx.manager_with(key(), 30).create().await.unwrap();
    fx.store.delete("r1", "tester").unwrap();

    fx.manager_with(key(), 30).restore(&snapshot.id).await.unwrap();
    assert!(fx.store.get("r1").unwrap().is_some());
}

#[tokio::test]
async fn unknown_snapshot_is_not_found() {
    let fx = Fixture::new();
    assert!(matches!(
        fx.manager(30).restore("nope").await,
        Err(BackupError::NotFound(id)) if id == "nope"
    ));
}

#[tokio::test]
async fn missing_blob_is_an_io_error() {
    let fx = Fixture::new();
    fx.seed(&["r1"]);
    let manager = fx.manager(30);
    let snapshot = manager.create().await.unwrap();
    std::fs::remove_file(fx.dir.path().join(&snapshot.encrypted_blob_ref)).unwrap();

    assert!(matches!(
        manager.restore(&snapshot.id).await,
        Err(BackupError::Io { .. })
    ));
}

#[tokio::test]
async fn list_is_newest_first() {
    let fx = Fixture::new();
    fx.seed(&["r1"]);
    let manager = fx.manager(30);
    let first = manager.create().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = manager.create().await.unwrap();

    let ids: Vec<String> = manager.list().await.unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn prune_removes_only_expired_snapshots() {
    let fx = Fixture::new();
    fx.seed(&["r1"]);
    let short = fx.manager(1);
    let long = fx.manager(30);
    let expiring = short.create().await.unwrap();
    let kept = long.create().await.unwrap();

    assert!(long.prune_expired(now()).await.unwrap().is_empty());

    let pruned = long.prune_expired(now() + Duration::days(2)).await.unwrap();
    assert_eq!(pruned, vec![expiring.id.clone()]);
    assert_eq!(blob_files(fx.dir.path()), vec![kept.encrypted_blob_ref.clone()]);
    assert_eq!(long.list().await.unwrap(), vec![kept.clone()]);

    // Retention ends exactly at retention_until.
    let pruned = long.prune_expired(kept.retention_until).await.unwrap();
    assert_eq!(pruned, vec![kept.id]);
    assert!(blob_files(fx.dir.path()).is_empty());
}

#[tokio::test]
async fn prune_tolerates_an_already_deleted_blob() {
    let fx = Fixture::new();
    fx.seed(&["r1"]);
    let manager = fx.manager(1);
    let snapshot = manager.create().await.unwrap();
    std::fs::remove_file(fx.dir.path().join(&snapshot.encrypted_blob_ref)).unwrap();

    let pruned = manager.prune_expired(now() + Duration::days(1)).await.unwrap();
    assert_eq!(pruned, vec![snapshot.id]);
    assert!(manager.list().await.unwrap().is_empty());
}
