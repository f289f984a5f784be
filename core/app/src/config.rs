//! Engine assembly configuration.

use std::path::PathBuf;

use fieldline_cache::CacheConfig;
use fieldline_common::DeviceInfo;
use fieldline_net::ConnectivityConfig;
use fieldline_signing::SigningConfig;
use fieldline_sync::{DispatcherConfig, RetryPolicy, SchedulerConfig};

/// Everything needed to assemble an engine.
///
/// Stock policies work for a typical field deployment; individual
/// sections can be swapped with the `with_*` builders.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for durable state (collections and blobs).
    pub data_dir: PathBuf,
    /// Device identity stamped onto captured signatures.
    pub device: DeviceInfo,
    /// Connectivity quality floors and probe settings.
    pub connectivity: ConnectivityConfig,
    /// Read-through cache behavior.
    pub cache: CacheConfig,
    /// Signature geofence and attempt budget.
    pub signing: SigningConfig,
    /// Backoff between queue delivery attempts.
    pub retry: RetryPolicy,
    /// Batch sizing for sync passes.
    pub dispatcher: DispatcherConfig,
    /// Trigger timing for background sync.
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Config with stock policies, rooted at the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>, device: DeviceInfo) -> Self {
        Self {
            data_dir: data_dir.into(),
            device,
            connectivity: ConnectivityConfig::default(),
            cache: CacheConfig::default(),
            signing: SigningConfig::default(),
            retry: RetryPolicy::default(),
            dispatcher: DispatcherConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Replace the connectivity settings.
    pub fn with_connectivity(mut self, connectivity: ConnectivityConfig) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Replace the cache settings.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the signing settings.
    pub fn with_signing(mut self, signing: SigningConfig) -> Self {
        self.signing = signing;
        self
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the dispatcher settings.
    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replace the scheduler settings.
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}
