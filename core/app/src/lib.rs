//! FieldLine engine facade.
//!
//! Assembles the offline-first engine for a host application: durable
//! store, connectivity monitor, sync queue and dispatcher, read-through
//! cache, and the signature service, plus the background task that ties
//! sync triggers to delivery passes.

pub mod config;
pub mod engine;

pub use config::EngineConfig;
pub use engine::{FieldEngine, SystemStatus};

// The collaborator types a host needs to drive the engine
pub use fieldline_cache::{CacheConfig, CacheMode, RequestOptions};
pub use fieldline_common::{
    DeviceInfo, DraftForm, Error, GeoFix, HttpMethod, OfflineSignature, OpType, Priority,
    QueueItem, Result, SignatureCategory, SignaturePriority, SignatureStatus, SnapshotKind,
};
pub use fieldline_net::{
    CellularGeneration, ConnectivityConfig, ConnectivityEvent, ConnectivityState, HttpTransport,
    LinkSnapshot, Transport, TransportType,
};
pub use fieldline_signing::{
    BoundingRegion, LocationSource, SignatureRequest, SignatureStats, SigningConfig,
};
pub use fieldline_sync::{
    DispatcherConfig, QueueStatus, RetryPolicy, SchedulerConfig, SyncReport, SyncStatusEvent,
};
