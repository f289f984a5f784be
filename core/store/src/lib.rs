//! Durable local storage for the FieldLine engine.
//!
//! Everything the engine must not lose across restarts lives here: the
//! sync queue, offline signatures, cached responses, draft forms, and
//! entity snapshots as JSON collections, plus a blob directory for larger
//! payloads. Writers to the same collection are serialized.

pub mod blob;
pub mod local;

pub use blob::{BlobStats, BlobStore};
pub use local::{LocalStore, StoreStats};
