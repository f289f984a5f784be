//! Cache layer: TTL read-through caching with offline fallbacks.

pub mod layer;
pub mod optimistic;

pub use layer::{cache_key, CacheConfig, CacheLayer, CacheMode, RequestOptions};
pub use optimistic::synthetic_response;
