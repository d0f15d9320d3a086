use std::time::Duration;

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Master switch; when false `trigger()` is a no-op.
    pub enabled: bool,
    /// Records per `batch_upsert` call.
    pub push_batch_size: usize,
    /// Records per `list_changed_since` page.
    pub pull_page_size: usize,
    /// Bound on every remote call, probe included.
    pub request_timeout: Duration,
    /// Scheduler tick.
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            push_batch_size: 100,
            pull_page_size: 500,
            request_timeout: Duration::from_secs(30),
            interval: Duration::from_secs(300),
        }
    }
}
