use regcache_storage::LocalStore;
use regcache_types::InstanceLabel;

/// Post-cutover probe. A failure triggers an automatic rollback.
pub trait HealthCheck: Send + Sync {
    fn check(
        &self,
        store: &LocalStore,
        expected_active: InstanceLabel,
        expected_rows: u64,
    ) -> Result<(), String>;
}

/// Confirms the new instance is the one serving and holds the verified row count.
#[derive(Debug, Default, Clone, Copy)]
pub struct RowCountHealthCheck;

impl HealthCheck for RowCountHealthCheck {
    fn check(
        &self,
        store: &LocalStore,
        expected_active: InstanceLabel,
        expected_rows: u64,
    ) -> Result<(), String> {
        let active = store.active_instance().map_err(|e| e.to_string())?;
        if active != expected_active {
            return Err(format!("serving {active}, expected {expected_active}"));
        }
        let rows = store.count_rows(active).map_err(|e| e.to_string())?;
        // Local writes may land between cutover and this check.
        if rows < expected_rows {
            return Err(format!("{rows} rows serving, expected at least {expected_rows}"));
        }
        Ok(())
    }
}
