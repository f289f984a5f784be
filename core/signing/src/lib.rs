//! Offline signature capture with geofence validation and queued delivery.
//!
//! Signatures are validated at capture time, persisted locally with their
//! drawn image, and delivered either through the sync queue or by a direct
//! delivery pass. Every signature carries a 24 hour validity window.

pub mod config;
pub mod location;
pub mod service;

pub use config::{BoundingRegion, SigningConfig};
pub use location::LocationSource;
pub use service::{
    pending_signatures, signature_stats, sweep_expired, SignatureRequest, SignatureService,
    SignatureStats, SignatureSyncReport,
};
