//! Common types shared across the FieldLine engine crates.
//!
//! This module provides the error taxonomy and the persisted data model
//! (queue items, cache entries, offline signatures, drafts) that the
//! store, sync, cache, and signing crates all build on.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    CacheEntry, DeviceInfo, DraftForm, GeoFix, HttpMethod, OfflineSignature, OpType, Priority,
    QueueItem, SignatureCategory, SignatureMethod, SignaturePayload, SignaturePriority,
    SignatureStatus, SnapshotKind, DEFAULT_MAX_ATTEMPTS,
};
