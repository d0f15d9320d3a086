mod support;

use regcache_sync::{SyncOutcome, SyncScheduler};
use regcache_types::SyncStatus;
use std::time::Duration;
use support::*;

#[tokio::test]
async fn trigger_now_runs_a_pass() {
    let h = harness();
    h.store.put(&local("A1", 0), "user").unwrap();

    let scheduler = SyncScheduler::start(h.engine.clone(), Duration::from_secs(3600));
    let outcome = scheduler.trigger_now().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed(_)));
    assert_eq!(h.store.get("A1").unwrap().unwrap().sync_status, SyncStatus::Clean);

    scheduler.stop().await;
}

#[tokio::test]
async fn ticks_trigger_the_engine() {
    let h = harness();
    h.remote.seed(remote("R1", 1));

    let scheduler = SyncScheduler::start(h.engine.clone(), Duration::from_millis(50));
    let mut waited = Duration::ZERO;
    while h.store.get("R1").unwrap().is_none() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    scheduler.stop().await;

    assert!(h.store.get("R1").unwrap().is_some());
}

#[tokio::test]
async fn no_pass_runs_before_the_first_interval() {
    let h = harness();
    h.remote.seed(remote("R1", 1));

    let scheduler = SyncScheduler::start(h.engine.clone(), Duration::from_secs(3600));
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.stop().await;

    assert!(h.store.get("R1").unwrap().is_none());
}
