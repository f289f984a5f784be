//! TTL read-through cache in front of the remote transport.

use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use fieldline_common::{
    CacheEntry, Error, HttpMethod, OpType, Priority, QueueItem, Result, SnapshotKind,
};
use fieldline_net::{ConnectivityMonitor, Transport, TransportRequest};
use fieldline_store::LocalStore;
use fieldline_sync::SyncQueue;

use crate::optimistic::synthetic_response;

/// Connectivity situation scaling a cache entry's TTL on reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Normal freshness window.
    Online,
    /// Remote call failed; tolerate moderately stale data.
    RemoteError,
    /// Fully offline; tolerate the oldest acceptable data.
    Offline,
}

impl CacheMode {
    /// TTL scaling factor for this situation.
    pub fn ttl_multiplier(self) -> u32 {
        match self {
            CacheMode::Online => 1,
            CacheMode::RemoteError => 2,
            CacheMode::Offline => 4,
        }
    }
}

/// Cache layer configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch for response caching.
    pub enabled: bool,
    /// Base TTL for cached responses, in minutes.
    pub ttl_minutes: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_minutes: 30,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Serve and refresh the cache for this request.
    pub cache: bool,
    /// TTL override in minutes.
    pub ttl_minutes: Option<i64>,
    /// Queue priority used when the request is queued offline.
    pub priority: Priority,
    /// Permit queue-and-continue for writes while offline.
    pub allow_offline: bool,
    /// Operation type driving the optimistic response shape.
    pub op_type: OpType,
    /// Entity snapshot refreshed with successful GET payloads.
    pub snapshot: Option<SnapshotKind>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            cache: true,
            ttl_minutes: None,
            priority: Priority::Medium,
            allow_offline: false,
            op_type: OpType::Generic,
            snapshot: None,
        }
    }
}

impl RequestOptions {
    /// Options with caching on and offline queueing off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the cache for this request.
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Override the cache TTL.
    pub fn with_ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl_minutes = Some(minutes);
        self
    }

    /// Set the queue priority for offline execution.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Permit offline queueing, tagged with the given operation type.
    pub fn with_offline_queue(mut self, op_type: OpType) -> Self {
        self.allow_offline = true;
        self.op_type = op_type;
        self
    }

    /// Refresh the given entity snapshot from successful GET payloads.
    pub fn with_snapshot(mut self, kind: SnapshotKind) -> Self {
        self.snapshot = Some(kind);
        self
    }
}

/// Cache key: method, endpoint, and a stable hash of the body.
///
/// An absent body hashes as the empty string, so repeated bodiless GETs
/// share one entry.
pub fn cache_key(method: HttpMethod, endpoint: &str, body: Option<&Value>) -> String {
    let body_text = body.map(|b| b.to_string()).unwrap_or_default();
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(body_text.as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{} {}#{}", method, endpoint, hash)
}

/// Read-through cache over the remote transport.
///
/// Online requests go to the network first; GET responses refresh the
/// cache on the way back. Offline GETs are served from cache within the
/// offline-multiplied TTL. Offline writes are either queued with an
/// optimistic response or rejected, per caller options. Writes never
/// fall back to cache.
pub struct CacheLayer {
    store: Arc<LocalStore>,
    queue: Arc<SyncQueue>,
    monitor: Arc<ConnectivityMonitor>,
    transport: Arc<dyn Transport>,
    config: CacheConfig,
}

impl CacheLayer {
    /// Create a cache layer over the given collaborators.
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<SyncQueue>,
        monitor: Arc<ConnectivityMonitor>,
        transport: Arc<dyn Transport>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            queue,
            monitor,
            transport,
            config,
        }
    }

    /// Perform a request with offline fallbacks.
    ///
    /// # Errors
    /// - `NoCachedData` for an offline GET with nothing usable cached
    /// - `NetworkUnavailable` for an offline read that cannot be cached
    /// - `OperationUnavailableOffline` for an offline write the caller
    ///   did not permit to queue
    /// - Transport errors for online failures without a cache fallback
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        let cacheable = self.config.enabled && options.cache && method.is_cacheable();
        let key = cache_key(method, endpoint, body.as_ref());

        if !self.monitor.can_make_requests().await {
            return self
                .handle_offline(endpoint, method, body, options, cacheable, &key)
                .await;
        }

        let mut request = TransportRequest::new(method, endpoint);
        if let Some(body) = body.clone() {
            request = request.with_body(body);
        }

        match self.transport.send(request).await {
            Ok(response) => {
                if method.is_cacheable() {
                    if cacheable {
                        let entry = CacheEntry {
                            key: key.clone(),
                            payload: response.body.clone(),
                            stored_at: Utc::now(),
                            endpoint: endpoint.to_string(),
                            method,
                        };
                        self.store.cache_put(&entry).await?;
                    }
                    if let Some(kind) = options.snapshot {
                        self.store.set_snapshot(kind, &response.body).await?;
                    }
                }
                from_value(response.body)
            }
            Err(err) => {
                if cacheable {
                    if let Some(entry) =
                        self.lookup(&key, options, CacheMode::RemoteError).await?
                    {
                        warn!(endpoint, "Remote call failed, serving stale cache: {}", err);
                        return from_value(entry.payload);
                    }
                }
                Err(err)
            }
        }
    }

    /// Drop every cached response.
    pub async fn clear(&self) -> Result<()> {
        self.store.cache_clear().await
    }

    async fn handle_offline<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
        options: &RequestOptions,
        cacheable: bool,
        key: &str,
    ) -> Result<T> {
        match method {
            HttpMethod::Get if cacheable => {
                if let Some(entry) = self.lookup(key, options, CacheMode::Offline).await? {
                    debug!(endpoint, "Offline, served from cache");
                    return from_value(entry.payload);
                }
                Err(Error::NoCachedData(format!(
                    "No cached response for GET {}",
                    endpoint
                )))
            }
            HttpMethod::Get | HttpMethod::Head => Err(Error::NetworkUnavailable(format!(
                "{} {} requires connectivity",
                method, endpoint
            ))),
            _ if options.allow_offline => {
                let item = QueueItem::new(
                    options.op_type,
                    endpoint,
                    method,
                    body.unwrap_or(Value::Null),
                    options.priority,
                );
                let response = synthetic_response(options.op_type, &item.payload);
                self.queue.enqueue(item).await?;
                debug!(endpoint, op_type = ?options.op_type, "Offline write queued");
                from_value(response)
            }
            _ => Err(Error::OperationUnavailableOffline(format!(
                "{} {} is not permitted offline",
                method, endpoint
            ))),
        }
    }

    async fn lookup(
        &self,
        key: &str,
        options: &RequestOptions,
        mode: CacheMode,
    ) -> Result<Option<CacheEntry>> {
        let Some(entry) = self.store.cache_get(key).await? else {
            return Ok(None);
        };
        let ttl =
            ChronoDuration::minutes(options.ttl_minutes.unwrap_or(self.config.ttl_minutes));
        if entry.is_fresh(ttl, mode.ttl_multiplier(), Utc::now()) {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fieldline_net::{ConnectivityConfig, LinkSnapshot, TransportResponse, TransportType};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tempfile::TempDir;

    struct ScriptedTransport {
        body: Value,
        fail: AtomicBool,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn returning(body: Value) -> Self {
            Self {
                body,
                fail: AtomicBool::new(false),
                calls: AtomicU32::new(0),
            }
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            _request: TransportRequest,
        ) -> fieldline_common::Result<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(Error::Network("connection reset".to_string()))
            } else {
                Ok(TransportResponse {
                    status: 200,
                    body: self.body.clone(),
                })
            }
        }
    }

    struct Rig {
        store: Arc<LocalStore>,
        queue: Arc<SyncQueue>,
        monitor: Arc<ConnectivityMonitor>,
        layer: CacheLayer,
    }

    async fn rig(temp: &TempDir, transport: Arc<ScriptedTransport>) -> Rig {
        let store = Arc::new(LocalStore::new(temp.path()).await.unwrap());
        let queue = Arc::new(SyncQueue::new(store.clone()));
        let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityConfig::default()));
        let layer = CacheLayer::new(
            store.clone(),
            queue.clone(),
            monitor.clone(),
            transport,
            CacheConfig::default(),
        );
        Rig {
            store,
            queue,
            monitor,
            layer,
        }
    }

    async fn go_online(monitor: &ConnectivityMonitor) {
        monitor
            .apply_snapshot(&LinkSnapshot {
                transport: TransportType::Wifi,
                signal_percent: Some(90),
                generation: None,
                reachable: Some(true),
            })
            .await;
    }

    async fn go_offline(monitor: &ConnectivityMonitor) {
        monitor.apply_snapshot(&LinkSnapshot::offline()).await;
    }

    #[tokio::test]
    async fn test_online_get_hits_network_and_caches() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({"items": [1, 2]})));
        let rig = rig(&temp, transport.clone()).await;
        go_online(&rig.monitor).await;

        let value: Value = rig
            .layer
            .request("/api/activities", HttpMethod::Get, None, &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(value, json!({"items": [1, 2]}));
        assert_eq!(transport.calls(), 1);

        let key = cache_key(HttpMethod::Get, "/api/activities", None);
        let entry = rig.store.cache_get(&key).await.unwrap().unwrap();
        assert_eq!(entry.payload, json!({"items": [1, 2]}));
    }

    #[tokio::test]
    async fn test_offline_get_served_from_cache() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({"items": [3]})));
        let rig = rig(&temp, transport.clone()).await;

        go_online(&rig.monitor).await;
        let options = RequestOptions::new();
        let _: Value = rig
            .layer
            .request("/api/templates", HttpMethod::Get, None, &options)
            .await
            .unwrap();

        go_offline(&rig.monitor).await;
        let value: Value = rig
            .layer
            .request("/api/templates", HttpMethod::Get, None, &options)
            .await
            .unwrap();
        assert_eq!(value, json!({"items": [3]}));
        // The offline read never touched the network
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_get_past_extended_ttl_fails() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({})));
        let rig = rig(&temp, transport).await;

        // 30 minute TTL, offline multiplier 4: 121 minutes is too old
        let key = cache_key(HttpMethod::Get, "/api/docs", None);
        rig.store
            .cache_put(&CacheEntry {
                key: key.clone(),
                payload: json!({"old": true}),
                stored_at: Utc::now() - ChronoDuration::minutes(121),
                endpoint: "/api/docs".to_string(),
                method: HttpMethod::Get,
            })
            .await
            .unwrap();

        go_offline(&rig.monitor).await;
        let result: Result<Value> = rig
            .layer
            .request("/api/docs", HttpMethod::Get, None, &RequestOptions::new())
            .await;
        assert!(matches!(result, Err(Error::NoCachedData(_))));
    }

    #[tokio::test]
    async fn test_offline_get_within_extended_ttl_succeeds() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({})));
        let rig = rig(&temp, transport).await;

        // 45 minutes is past the base TTL but within the 4x offline window
        let key = cache_key(HttpMethod::Get, "/api/docs", None);
        rig.store
            .cache_put(&CacheEntry {
                key,
                payload: json!({"doc": 1}),
                stored_at: Utc::now() - ChronoDuration::minutes(45),
                endpoint: "/api/docs".to_string(),
                method: HttpMethod::Get,
            })
            .await
            .unwrap();

        go_offline(&rig.monitor).await;
        let value: Value = rig
            .layer
            .request("/api/docs", HttpMethod::Get, None, &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(value, json!({"doc": 1}));
    }

    #[tokio::test]
    async fn test_remote_error_falls_back_to_stale_cache() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({"fresh": true})));
        let rig = rig(&temp, transport.clone()).await;
        go_online(&rig.monitor).await;

        // 45 minutes: stale for normal reads, fresh within the 2x error window
        let key = cache_key(HttpMethod::Get, "/api/activities", None);
        rig.store
            .cache_put(&CacheEntry {
                key,
                payload: json!({"stale": true}),
                stored_at: Utc::now() - ChronoDuration::minutes(45),
                endpoint: "/api/activities".to_string(),
                method: HttpMethod::Get,
            })
            .await
            .unwrap();

        transport.set_failing(true);
        let value: Value = rig
            .layer
            .request("/api/activities", HttpMethod::Get, None, &RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(value, json!({"stale": true}));
    }

    #[tokio::test]
    async fn test_remote_error_past_error_ttl_propagates() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({})));
        let rig = rig(&temp, transport.clone()).await;
        go_online(&rig.monitor).await;

        // 61 minutes is past even the 2x error window
        let key = cache_key(HttpMethod::Get, "/api/activities", None);
        rig.store
            .cache_put(&CacheEntry {
                key,
                payload: json!({"stale": true}),
                stored_at: Utc::now() - ChronoDuration::minutes(61),
                endpoint: "/api/activities".to_string(),
                method: HttpMethod::Get,
            })
            .await
            .unwrap();

        transport.set_failing(true);
        let result: Result<Value> = rig
            .layer
            .request("/api/activities", HttpMethod::Get, None, &RequestOptions::new())
            .await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_offline_write_queues_with_optimistic_response() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({})));
        let rig = rig(&temp, transport.clone()).await;
        go_offline(&rig.monitor).await;

        let options = RequestOptions::new()
            .with_offline_queue(OpType::ActivityComplete)
            .with_priority(Priority::High);
        let payload = json!({"activity_id": "act-7"});
        let response: Value = rig
            .layer
            .request(
                "/api/activities/act-7/complete",
                HttpMethod::Post,
                Some(payload.clone()),
                &options,
            )
            .await
            .unwrap();

        assert_eq!(response["offline"], json!(true));
        assert_eq!(response["pending_sync"], json!(true));
        assert_eq!(response["data"], payload);
        assert_eq!(transport.calls(), 0);

        let items = rig.queue.items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].op_type, OpType::ActivityComplete);
        assert_eq!(items[0].priority, Priority::High);
        assert_eq!(items[0].payload, payload);
    }

    #[tokio::test]
    async fn test_offline_write_forbidden_by_default() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({})));
        let rig = rig(&temp, transport).await;
        go_offline(&rig.monitor).await;

        let result: Result<Value> = rig
            .layer
            .request(
                "/api/documents",
                HttpMethod::Post,
                Some(json!({"title": "t"})),
                &RequestOptions::new(),
            )
            .await;
        assert!(matches!(result, Err(Error::OperationUnavailableOffline(_))));
        assert!(rig.queue.items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_online_write_failure_propagates_without_queueing() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::returning(json!({})));
        let rig = rig(&temp, transport.clone()).await;
        go_online(&rig.monitor).await;
        transport.set_failing(true);

        let options = RequestOptions::new().with_offline_queue(OpType::DocumentCreate);
        let result: Result<Value> = rig
            .layer
            .request(
                "/api/documents",
                HttpMethod::Post,
                Some(json!({"title": "t"})),
                &options,
            )
            .await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert!(rig.queue.items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_hint_refreshes_snapshot() {
        let temp = TempDir::new().unwrap();
        let body = json!([{"id": "a1"}, {"id": "a2"}]);
        let transport = Arc::new(ScriptedTransport::returning(body.clone()));
        let rig = rig(&temp, transport).await;
        go_online(&rig.monitor).await;

        let options = RequestOptions::new().with_snapshot(SnapshotKind::Activities);
        let _: Value = rig
            .layer
            .request("/api/activities", HttpMethod::Get, None, &options)
            .await
            .unwrap();

        let snapshot = rig.store.snapshot(SnapshotKind::Activities).await.unwrap();
        assert_eq!(snapshot, Some(body));
    }

    #[test]
    fn test_cache_key_distinguishes_bodies() {
        let a = cache_key(
            HttpMethod::Get,
            "/api/search",
            Some(&json!({"q": "pumps"})),
        );
        let b = cache_key(
            HttpMethod::Get,
            "/api/search",
            Some(&json!({"q": "valves"})),
        );
        let c = cache_key(HttpMethod::Get, "/api/search", None);

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("GET /api/search#"));
    }

    #[test]
    fn test_ttl_multipliers() {
        assert_eq!(CacheMode::Online.ttl_multiplier(), 1);
        assert_eq!(CacheMode::RemoteError.ttl_multiplier(), 2);
        assert_eq!(CacheMode::Offline.ttl_multiplier(), 4);
    }
}
