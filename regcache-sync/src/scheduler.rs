//! Background task that triggers the engine on a fixed interval.

use crate::engine::{SyncEngine, SyncOutcome};
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum SchedulerCommand {
    TriggerNow(oneshot::Sender<SyncOutcome>),
    Stop,
}

/// Starts the background sync task.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawns the task on the current runtime. The first tick fires one full
    /// `interval` after start.
    pub fn start(engine: Arc<SyncEngine>, interval: Duration) -> SchedulerHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let task = tokio::spawn(run(engine, interval, command_rx));
        SchedulerHandle { command_tx, task }
    }
}

/// Lifecycle handle for a running scheduler.
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Runs a sync pass now, on the scheduler task, and waits for its outcome.
    pub async fn trigger_now(&self) -> SyncResult<SyncOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::TriggerNow(reply_tx))
            .await
            .map_err(|_| SyncError::Internal("sync scheduler not running".into()))?;
        reply_rx
            .await
            .map_err(|_| SyncError::Internal("sync scheduler stopped before replying".into()))
    }

    /// Stops the task and waits for it to exit. A run in progress finishes first.
    pub async fn stop(self) {
        if self.command_tx.send(SchedulerCommand::Stop).await.is_err() {
            debug!("sync scheduler already stopped");
        }
        if let Err(e) = self.task.await {
            warn!("sync scheduler task ended abnormally: {e}");
        }
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    interval: Duration,
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
) {
    info!("sync scheduler started, interval {interval:?}");
    // interval() panics on zero
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Skip first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = engine.trigger().await;
                debug!("scheduled sync: {outcome:?}");
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SchedulerCommand::TriggerNow(reply)) => {
                        let outcome = engine.trigger().await;
                        let _ = reply.send(outcome);
                    }
                    Some(SchedulerCommand::Stop) => {
                        info!("sync scheduler stopping");
                        break;
                    }
                    None => {
                        info!("command channel closed, stopping sync scheduler");
                        break;
                    }
                }
            }
        }
    }

    info!("sync scheduler stopped");
}
