//! Cancellable periodic background tasks.
//!
//! Cache sweeps and limiter compaction run on a fixed interval. Each task is
//! owned by whoever spawned it and stops when [`PeriodicTask::stop`] is called
//! or the handle is dropped, so shutdown is deterministic.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a periodic background task.
pub struct PeriodicTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `tick` every `interval` until stopped.
    ///
    /// The first tick fires one full interval after spawning. Must be called
    /// from within a Tokio runtime.
    pub fn spawn<F>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        tick();
                    }
                }
            }
            debug!("Periodic task '{name}' stopped");
        });

        debug!("Periodic task '{name}' started (interval={interval:?})");

        Self {
            name,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Task name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
