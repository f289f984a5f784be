//! Engine facade wiring the store, connectivity, queue, cache, and
//! signing service together.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use fieldline_cache::{CacheLayer, RequestOptions};
use fieldline_common::{
    DraftForm, Error, HttpMethod, OfflineSignature, QueueItem, Result, SnapshotKind,
};
use fieldline_net::{
    ConnectivityEvent, ConnectivityMonitor, ConnectivityState, LinkSnapshot, Transport,
};
use fieldline_signing::{
    LocationSource, SignatureRequest, SignatureService, SignatureStats, SignatureSyncReport,
};
use fieldline_store::{BlobStats, BlobStore, LocalStore, StoreStats};
use fieldline_sync::{
    Dispatcher, QueueStatus, SchedulerHandle, SyncQueue, SyncReport, SyncScheduler,
    SyncStatusEvent,
};

use crate::config::EngineConfig;

/// Snapshot of the engine's moving parts, for status screens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Current derived connectivity state.
    pub connectivity: ConnectivityState,
    /// Queue counts.
    pub queue: QueueStatus,
    /// Signature counts by status and priority.
    pub signatures: SignatureStats,
    /// Collection entry counts and on-disk size.
    pub store: StoreStats,
    /// Blob count and total size.
    pub blobs: BlobStats,
    /// When the last sync pass completed.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// A sync pass is running right now.
    pub sync_running: bool,
}

/// The offline-first engine.
///
/// One instance per device. The host platform feeds link snapshots in
/// through [`FieldEngine::apply_link_snapshot`] and performs its API
/// traffic through [`FieldEngine::request`]; everything else (queueing,
/// retry, cache fallbacks, signature delivery) happens behind the facade.
pub struct FieldEngine {
    store: Arc<LocalStore>,
    blobs: Arc<BlobStore>,
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<SyncQueue>,
    dispatcher: Arc<Dispatcher>,
    cache: CacheLayer,
    signing: Arc<SignatureService>,
    transport: Arc<dyn Transport>,
    scheduler: SyncScheduler,
    handle: Mutex<Option<SchedulerHandle>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FieldEngine {
    /// Assemble an engine over the given transport and location source.
    ///
    /// Opens (or creates) the durable store under `config.data_dir`. The
    /// engine starts with connectivity assumed offline until the host
    /// supplies a link snapshot.
    pub async fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        location: Arc<dyn LocationSource>,
    ) -> Result<Self> {
        let store = Arc::new(LocalStore::new(&config.data_dir).await?);
        let blobs = Arc::new(BlobStore::new(&config.data_dir).await?);
        let monitor = Arc::new(ConnectivityMonitor::new(config.connectivity.clone()));
        let queue = Arc::new(SyncQueue::new(store.clone()).with_policy(config.retry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            store.clone(),
            monitor.clone(),
            transport.clone(),
            config.dispatcher.clone(),
        ));
        let cache = CacheLayer::new(
            store.clone(),
            queue.clone(),
            monitor.clone(),
            transport.clone(),
            config.cache.clone(),
        );
        let signing = Arc::new(SignatureService::new(
            store.clone(),
            blobs.clone(),
            queue.clone(),
            transport.clone(),
            location,
            config.device.clone(),
            config.signing.clone(),
        ));
        let (scheduler, handle) = SyncScheduler::new(config.scheduler.clone(), monitor.clone());

        Ok(Self {
            store,
            blobs,
            monitor,
            queue,
            dispatcher,
            cache,
            signing,
            transport,
            scheduler,
            handle: Mutex::new(Some(handle)),
            worker: Mutex::new(None),
        })
    }

    /// Start the background sync task.
    ///
    /// # Errors
    /// - `InvalidInput` if the engine was already started
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.handle.lock().await;
        let Some(handle) = slot.take() else {
            return Err(Error::InvalidInput("engine already started".to_string()));
        };

        let dispatcher = self.dispatcher.clone();
        let signing = self.signing.clone();
        let worker = tokio::spawn(handle.run(move || {
            Self::run_sync_pass(dispatcher.clone(), signing.clone())
        }));
        *self.worker.lock().await = Some(worker);
        info!("Engine started");
        Ok(())
    }

    /// Stop the background sync task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(err) = worker.await {
                warn!("Sync task ended abnormally: {}", err);
            }
        }
        info!("Engine stopped");
    }

    /// Perform a request through the offline-aware cache layer.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        self.cache.request(endpoint, method, body, options).await
    }

    /// Enqueue an operation for background delivery.
    ///
    /// Nudges the scheduler; if the device is online the item is
    /// typically dispatched within the debounce window.
    pub async fn add_to_queue(&self, item: QueueItem) -> Result<Uuid> {
        let id = self.queue.enqueue(item).await?;
        self.scheduler.kick();
        Ok(id)
    }

    /// Run one sync pass right now, then settle signature bookkeeping.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        Self::run_sync_pass(self.dispatcher.clone(), self.signing.clone()).await
    }

    /// Queue counts.
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        self.queue.status().await
    }

    /// Items currently queued.
    pub async fn queue_items(&self) -> Result<Vec<QueueItem>> {
        self.queue.items().await
    }

    /// Give a terminally failed item a fresh attempt budget.
    pub async fn retry_item(&self, id: Uuid) -> Result<()> {
        self.queue.retry_item(id).await?;
        self.scheduler.kick();
        Ok(())
    }

    /// Drop terminally failed items. Returns how many were removed.
    pub async fn purge_failed(&self) -> Result<usize> {
        self.queue.purge_failed().await
    }

    /// Capture a signature for later delivery.
    pub async fn create_offline_signature(
        &self,
        request: SignatureRequest,
    ) -> Result<OfflineSignature> {
        let signature = self.signing.create_offline_signature(request).await?;
        self.scheduler.kick();
        Ok(signature)
    }

    /// Deliver pending signatures directly, most urgent first.
    ///
    /// # Errors
    /// - `NetworkUnavailable` when live calls are not possible
    pub async fn sync_pending_signatures(&self) -> Result<SignatureSyncReport> {
        if !self.monitor.can_make_requests().await {
            return Err(Error::NetworkUnavailable(
                "signature delivery needs a live connection".to_string(),
            ));
        }
        self.signing.sync_pending().await
    }

    /// Pending, non-expired signatures, most urgent first.
    pub async fn pending_signatures(&self) -> Result<Vec<OfflineSignature>> {
        self.signing.pending().await
    }

    /// Signature counts by status and priority.
    pub async fn signature_stats(&self) -> Result<SignatureStats> {
        self.signing.stats().await
    }

    /// Reclassify aged-out pending signatures.
    pub async fn cleanup_expired_signatures(&self) -> Result<usize> {
        self.signing.cleanup_expired().await
    }

    /// Persist a partially filled form for the given activity.
    pub async fn save_draft(&self, draft: &DraftForm) -> Result<()> {
        self.store.save_draft(draft).await
    }

    /// Load the draft for the given activity, if one exists.
    pub async fn draft(&self, activity_id: &str) -> Result<Option<DraftForm>> {
        self.store.draft(activity_id).await
    }

    /// Discard the draft for the given activity.
    pub async fn remove_draft(&self, activity_id: &str) -> Result<bool> {
        self.store.remove_draft(activity_id).await
    }

    /// Load a cached entity snapshot for offline reads.
    ///
    /// Snapshots are refreshed by tagged GETs through [`FieldEngine::request`].
    pub async fn snapshot(&self, kind: SnapshotKind) -> Result<Option<Value>> {
        self.store.snapshot(kind).await
    }

    /// Feed a platform link snapshot into the connectivity monitor.
    pub async fn apply_link_snapshot(&self, snapshot: &LinkSnapshot) {
        self.monitor.apply_snapshot(snapshot).await;
    }

    /// Current derived connectivity state.
    pub async fn connectivity_state(&self) -> ConnectivityState {
        self.monitor.state().await
    }

    /// Whether live calls are possible right now.
    pub async fn is_online(&self) -> bool {
        self.monitor.is_online().await
    }

    /// Actively probe the backend and fold the result into the state.
    pub async fn probe_backend(&self) -> bool {
        self.monitor.probe(self.transport.as_ref()).await
    }

    /// Subscribe to connectivity transitions.
    pub async fn subscribe_connectivity(&self) -> UnboundedReceiver<ConnectivityEvent> {
        self.monitor.subscribe().await
    }

    /// Subscribe to sync pass progress events.
    pub async fn subscribe_sync_status(&self) -> UnboundedReceiver<SyncStatusEvent> {
        self.dispatcher.subscribe().await
    }

    /// Drop every cached response.
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }

    /// Snapshot of the engine's moving parts.
    pub async fn system_status(&self) -> Result<SystemStatus> {
        Ok(SystemStatus {
            connectivity: self.monitor.state().await,
            queue: self.queue.status().await?,
            signatures: self.signing.stats().await?,
            store: self.store.stats().await?,
            blobs: self.blobs.stats().await?,
            last_sync_at: self.store.last_sync_at().await?,
            sync_running: self.dispatcher.is_running(),
        })
    }

    /// Wipe all durable state: collections, cache, and blobs.
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        self.blobs.clear().await
    }

    async fn run_sync_pass(
        dispatcher: Arc<Dispatcher>,
        signing: Arc<SignatureService>,
    ) -> Result<SyncReport> {
        let report = dispatcher.sync_now().await?;
        // Bookkeeping failures must not fail a delivered pass
        if let Err(err) = signing.cleanup_expired().await {
            warn!("Expiry sweep failed: {}", err);
        }
        if let Err(err) = signing.reconcile_with_queue().await {
            warn!("Signature reconcile failed: {}", err);
        }
        Ok(report)
    }
}
