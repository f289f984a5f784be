//! Sync triggering: debounced kicks, periodic timer, reconnect edges.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

use fieldline_common::{Error, Result};
use fieldline_net::{ConnectivityEvent, ConnectivityMonitor};

use crate::dispatcher::SyncReport;

/// Scheduler timing configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed interval between periodic sync passes while online.
    pub sync_interval: Duration,
    /// Window in which rapid enqueue kicks collapse into one pass.
    pub kick_debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            kick_debounce: Duration::from_millis(500),
        }
    }
}

/// Front half of the scheduler: accepts kicks and shutdown.
///
/// All triggers funnel into the same sync entry point, which is
/// single-flight on its own; overlapping triggers are safe.
pub struct SyncScheduler {
    kick_tx: mpsc::UnboundedSender<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl SyncScheduler {
    /// Create a scheduler and the handle that runs its background task.
    pub fn new(
        config: SchedulerConfig,
        monitor: Arc<ConnectivityMonitor>,
    ) -> (Self, SchedulerHandle) {
        let (kick_tx, kick_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = Self {
            kick_tx,
            shutdown_tx,
        };
        let handle = SchedulerHandle {
            config,
            monitor,
            kick_rx,
            shutdown_rx,
        };

        (scheduler, handle)
    }

    /// Request a near-immediate (debounced) sync pass.
    ///
    /// Fired after each enqueue. Skipped at dispatch time if offline.
    pub fn kick(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Stop the background task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Back half of the scheduler: the background task itself.
pub struct SchedulerHandle {
    config: SchedulerConfig,
    monitor: Arc<ConnectivityMonitor>,
    kick_rx: mpsc::UnboundedReceiver<()>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SchedulerHandle {
    /// Run the trigger loop. Spawn this in a tokio task.
    ///
    /// `sync_fn` is called for every fired trigger: a debounced kick, a
    /// periodic tick while online, or a reconnect edge. Offline periods
    /// pause the periodic timer's effect; a reconnect edge syncs
    /// immediately.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SyncReport>> + Send,
    {
        let mut connectivity_rx = self.monitor.subscribe().await;
        let mut ticker = interval(self.config.sync_interval);
        // Ticks missed while a pass runs collapse into one
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; the first
        // periodic pass should wait a full interval
        ticker.tick().await;

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                }
                Some(()) = self.kick_rx.recv() => {
                    sleep(self.config.kick_debounce).await;
                    while self.kick_rx.try_recv().is_ok() {}
                    if self.monitor.can_make_requests().await {
                        Self::run_sync(&sync_fn, "kick").await;
                    } else {
                        debug!("Kick ignored while offline");
                    }
                }
                event = connectivity_rx.recv() => {
                    match event {
                        Some(ConnectivityEvent::Connected) => {
                            debug!("Reconnected, syncing immediately");
                            Self::run_sync(&sync_fn, "reconnect").await;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if self.monitor.is_online().await {
                        Self::run_sync(&sync_fn, "interval").await;
                    }
                }
            }
        }
    }

    async fn run_sync<F, Fut>(sync_fn: &F, trigger: &str)
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<SyncReport>> + Send,
    {
        match sync_fn().await {
            Ok(report) => {
                debug!(
                    trigger,
                    synced = report.synced,
                    failed = report.failed,
                    "Triggered sync finished"
                );
            }
            Err(Error::NetworkUnavailable(_)) => {
                debug!(trigger, "Triggered sync skipped, offline");
            }
            Err(err) => {
                error!(trigger, "Triggered sync failed: {}", err);
            }
        }
    }
}
