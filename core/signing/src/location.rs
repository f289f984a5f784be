//! Location capture seam.

use async_trait::async_trait;

use fieldline_common::{GeoFix, Result};

/// Source of geolocation fixes, implemented by the embedding host.
///
/// A failure here never blocks signature capture: the service records
/// the low-confidence fallback fix instead and lets the geofence policy
/// decide.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Capture the current location.
    ///
    /// # Errors
    /// - Platform location unavailable or permission denied
    async fn current(&self) -> Result<GeoFix>;
}
