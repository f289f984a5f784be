//! Batched queue dispatch with a single-flight guarantee.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use fieldline_common::{Error, QueueItem, Result};
use fieldline_net::{ConnectivityMonitor, Transport, TransportRequest};
use fieldline_store::LocalStore;

use crate::queue::SyncQueue;

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Items dispatched concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause: Duration::from_millis(500),
        }
    }
}

/// How a sync pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The pass ran to completion.
    Completed,
    /// Another pass held the lock; nothing was touched.
    AlreadyRunning,
}

/// Aggregate result of one sync pass.
///
/// Individual item failures never fail the pass; they are counted here
/// and the items stay queued for later attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// How the pass ended.
    pub outcome: SyncOutcome,
    /// Items delivered and removed.
    pub synced: usize,
    /// Items that failed this pass.
    pub failed: usize,
    /// Error message per failed item.
    pub errors: Vec<(Uuid, String)>,
    /// Wall-clock duration of the pass.
    pub duration_ms: u64,
}

impl SyncReport {
    fn already_running() -> Self {
        Self {
            outcome: SyncOutcome::AlreadyRunning,
            synced: 0,
            failed: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Incremental progress published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusEvent {
    /// Whether a pass is currently running.
    pub running: bool,
    /// Share of eligible items resolved so far.
    pub percent: u8,
    /// Label of the batch just finished ("batch 2/5").
    pub batch: Option<String>,
    /// Terminal report, set on the final event of a pass.
    pub report: Option<SyncReport>,
}

/// Drains the sync queue in priority order, in bounded concurrent batches.
///
/// Only one pass may run at a time. A second call while a pass holds the
/// lock returns an `AlreadyRunning` report without touching the queue;
/// the periodic timer, reconnect trigger, and manual calls all funnel
/// through the same guarded entry point.
pub struct Dispatcher {
    queue: Arc<SyncQueue>,
    store: Arc<LocalStore>,
    monitor: Arc<ConnectivityMonitor>,
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    run_lock: Mutex<()>,
    subscribers: Mutex<Vec<UnboundedSender<SyncStatusEvent>>>,
}

impl Dispatcher {
    /// Create a dispatcher over the given collaborators.
    pub fn new(
        queue: Arc<SyncQueue>,
        store: Arc<LocalStore>,
        monitor: Arc<ConnectivityMonitor>,
        transport: Arc<dyn Transport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            store,
            monitor,
            transport,
            config,
            run_lock: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Whether a pass is currently running.
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Subscribe to progress events.
    ///
    /// Dropped receivers are pruned on the next publish.
    pub async fn subscribe(&self) -> UnboundedReceiver<SyncStatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Run one sync pass now.
    ///
    /// Eligible items are sorted priority-first then FIFO, split into
    /// fixed-size batches, and dispatched with one in-flight call per
    /// item within a batch. Successes leave the queue; failures are
    /// recorded and stay queued unless their attempt budget ran out.
    ///
    /// # Errors
    /// - `NetworkUnavailable` when live calls are not possible; the
    ///   queue is left untouched
    /// - Storage errors reading or writing the queue
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            debug!("Sync already running, skipping");
            return Ok(SyncReport::already_running());
        };

        if !self.monitor.can_make_requests().await {
            return Err(Error::NetworkUnavailable(
                "Sync requires connectivity".to_string(),
            ));
        }

        let started = Instant::now();
        let eligible = self.queue.eligible(Utc::now()).await?;
        let total = eligible.len();

        info!(total, "Sync pass started");
        self.publish(SyncStatusEvent {
            running: true,
            percent: 0,
            batch: None,
            report: None,
        })
        .await;

        let mut synced = 0;
        let mut failed = 0;
        let mut errors: Vec<(Uuid, String)> = Vec::new();
        let batch_size = self.config.batch_size.max(1);
        let batch_count = total.div_ceil(batch_size);

        for (index, batch) in eligible.chunks(batch_size).enumerate() {
            let label = format!("batch {}/{}", index + 1, batch_count);
            debug!(%label, size = batch.len(), "Dispatching batch");

            let outcomes = join_all(batch.iter().map(|item| self.dispatch_item(item))).await;

            for (item, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => {
                        self.queue.record_success(item.id).await?;
                        synced += 1;
                    }
                    Err(err) => {
                        let message = err.to_string();
                        self.queue.record_failure(item.id, &message).await?;
                        errors.push((item.id, message));
                        failed += 1;
                    }
                }
            }

            let resolved = synced + failed;
            self.publish(SyncStatusEvent {
                running: true,
                percent: (resolved * 100 / total) as u8,
                batch: Some(label),
                report: None,
            })
            .await;

            if (index + 1) * batch_size < total {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        self.store.set_last_sync_at(Utc::now()).await?;

        let report = SyncReport {
            outcome: SyncOutcome::Completed,
            synced,
            failed,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            synced,
            failed,
            duration_ms = report.duration_ms,
            "Sync pass finished"
        );
        self.publish(SyncStatusEvent {
            running: false,
            percent: 100,
            batch: None,
            report: Some(report.clone()),
        })
        .await;

        Ok(report)
    }

    async fn dispatch_item(&self, item: &QueueItem) -> Result<()> {
        let mut request = TransportRequest::new(item.method, &item.endpoint);
        if !item.payload.is_null() {
            request = request.with_body(item.payload.clone());
        }
        self.transport.send(request).await.map_err(|err| {
            Error::SyncItemFailed(format!("{} {}: {}", item.method, item.endpoint, err))
        })?;
        Ok(())
    }

    async fn publish(&self, event: SyncStatusEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fieldline_common::{HttpMethod, OpType, Priority};
    use fieldline_net::{ConnectivityConfig, LinkSnapshot, TransportResponse, TransportType};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct ScriptedTransport {
        calls: StdMutex<Vec<String>>,
        fail_endpoints: HashSet<String>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                fail_endpoints: HashSet::new(),
                delay: None,
            }
        }

        fn failing_on(mut self, endpoint: &str) -> Self {
            self.fail_endpoints.insert(endpoint.to_string());
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> fieldline_common::Result<TransportResponse> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(request.endpoint.clone());
            if self.fail_endpoints.contains(&request.endpoint) {
                Err(Error::Network("connection reset".to_string()))
            } else {
                Ok(TransportResponse {
                    status: 200,
                    body: json!({"ok": true}),
                })
            }
        }
    }

    struct Rig {
        store: Arc<LocalStore>,
        queue: Arc<SyncQueue>,
        dispatcher: Arc<Dispatcher>,
    }

    async fn rig(temp: &TempDir, transport: Arc<ScriptedTransport>, online: bool) -> Rig {
        let store = Arc::new(LocalStore::new(temp.path()).await.unwrap());
        let queue = Arc::new(SyncQueue::new(store.clone()));
        let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityConfig::default()));
        if online {
            monitor
                .apply_snapshot(&LinkSnapshot {
                    transport: TransportType::Wifi,
                    signal_percent: Some(90),
                    generation: None,
                    reachable: Some(true),
                })
                .await;
        }
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            store.clone(),
            monitor,
            transport,
            DispatcherConfig {
                batch_size: 10,
                batch_pause: Duration::from_millis(1),
            },
        ));
        Rig {
            store,
            queue,
            dispatcher,
        }
    }

    fn item(priority: Priority, endpoint: &str) -> QueueItem {
        QueueItem::new(
            OpType::Generic,
            endpoint,
            HttpMethod::Post,
            json!({"v": 1}),
            priority,
        )
    }

    #[tokio::test]
    async fn test_sync_drains_queue() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let rig = rig(&temp, transport, true).await;

        for endpoint in ["/a", "/b", "/c"] {
            rig.queue
                .enqueue(item(Priority::Medium, endpoint))
                .await
                .unwrap();
        }

        let report = rig.dispatcher.sync_now().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Completed);
        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 0);
        assert!(rig.queue.items().await.unwrap().is_empty());
        assert!(rig.store.last_sync_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_items_stay_queued() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new().failing_on("/bad"));
        let rig = rig(&temp, transport, true).await;

        rig.queue.enqueue(item(Priority::High, "/ok")).await.unwrap();
        rig.queue
            .enqueue(item(Priority::High, "/bad"))
            .await
            .unwrap();

        let report = rig.dispatcher.sync_now().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);

        let remaining = rig.queue.items().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].endpoint, "/bad");
        assert_eq!(remaining[0].attempts, 1);
        assert!(remaining[0].last_error.is_some());
    }

    #[tokio::test]
    async fn test_offline_fails_fast_without_state_change() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let rig = rig(&temp, transport.clone(), false).await;

        rig.queue
            .enqueue(item(Priority::High, "/a"))
            .await
            .unwrap();

        let result = rig.dispatcher.sync_now().await;
        assert!(matches!(result, Err(Error::NetworkUnavailable(_))));
        assert!(transport.calls().is_empty());

        let items = rig.queue.items().await.unwrap();
        assert_eq!(items[0].attempts, 0);
        assert!(rig.store.last_sync_at().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_concurrent_call_reports_already_running() {
        let temp = TempDir::new().unwrap();
        let transport =
            Arc::new(ScriptedTransport::new().with_delay(Duration::from_millis(200)));
        let rig = rig(&temp, transport, true).await;

        rig.queue
            .enqueue(item(Priority::High, "/slow"))
            .await
            .unwrap();

        let dispatcher = rig.dispatcher.clone();
        let first = tokio::spawn(async move { dispatcher.sync_now().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rig.dispatcher.is_running());
        let second = rig.dispatcher.sync_now().await.unwrap();
        assert_eq!(second.outcome, SyncOutcome::AlreadyRunning);

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.outcome, SyncOutcome::Completed);
        assert_eq!(first.synced, 1);
    }

    #[tokio::test]
    async fn test_exhausted_item_excluded_from_next_pass() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new().failing_on("/bad"));
        let rig = rig(&temp, transport.clone(), true).await;

        let one_shot = item(Priority::High, "/bad").with_max_attempts(1);
        rig.queue.enqueue(one_shot).await.unwrap();

        let report = rig.dispatcher.sync_now().await.unwrap();
        assert_eq!(report.failed, 1);

        // Terminal now: the next pass must not touch it
        let report = rig.dispatcher.sync_now().await.unwrap();
        assert_eq!(report.synced + report.failed, 0);
        assert_eq!(transport.calls().len(), 1);

        let status = rig.queue.status().await.unwrap();
        assert_eq!(status.failed, 1);
    }

    #[tokio::test]
    async fn test_priority_order_across_batches() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(LocalStore::new(temp.path()).await.unwrap());
        let queue = Arc::new(SyncQueue::new(store.clone()));
        let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityConfig::default()));
        monitor
            .apply_snapshot(&LinkSnapshot {
                transport: TransportType::Wifi,
                signal_percent: Some(90),
                generation: None,
                reachable: Some(true),
            })
            .await;
        // Batch size 1 makes the dispatch order observable
        let dispatcher = Dispatcher::new(
            queue.clone(),
            store,
            monitor,
            transport.clone(),
            DispatcherConfig {
                batch_size: 1,
                batch_pause: Duration::from_millis(1),
            },
        );

        queue.enqueue(item(Priority::Low, "/low")).await.unwrap();
        queue.enqueue(item(Priority::High, "/high")).await.unwrap();
        queue
            .enqueue(item(Priority::Medium, "/medium"))
            .await
            .unwrap();

        dispatcher.sync_now().await.unwrap();
        assert_eq!(transport.calls(), vec!["/high", "/medium", "/low"]);
    }

    #[tokio::test]
    async fn test_progress_events_sequence() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(LocalStore::new(temp.path()).await.unwrap());
        let queue = Arc::new(SyncQueue::new(store.clone()));
        let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityConfig::default()));
        monitor
            .apply_snapshot(&LinkSnapshot {
                transport: TransportType::Wifi,
                signal_percent: Some(90),
                generation: None,
                reachable: Some(true),
            })
            .await;
        let dispatcher = Dispatcher::new(
            queue.clone(),
            store,
            monitor,
            transport,
            DispatcherConfig {
                batch_size: 1,
                batch_pause: Duration::from_millis(1),
            },
        );

        queue.enqueue(item(Priority::High, "/a")).await.unwrap();
        queue.enqueue(item(Priority::High, "/b")).await.unwrap();

        let mut events = dispatcher.subscribe().await;
        dispatcher.sync_now().await.unwrap();

        let start = events.try_recv().unwrap();
        assert!(start.running);
        assert_eq!(start.percent, 0);

        let first_batch = events.try_recv().unwrap();
        assert_eq!(first_batch.percent, 50);
        assert_eq!(first_batch.batch.as_deref(), Some("batch 1/2"));

        let second_batch = events.try_recv().unwrap();
        assert_eq!(second_batch.percent, 100);

        let terminal = events.try_recv().unwrap();
        assert!(!terminal.running);
        let report = terminal.report.unwrap();
        assert_eq!(report.synced, 2);
    }
}
