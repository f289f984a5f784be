//! Geofence and retry configuration for signature capture.

use serde::{Deserialize, Serialize};

use fieldline_common::GeoFix;

/// Authorized capture region, axis-aligned in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl BoundingRegion {
    /// Create a region from its edges.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// The whole planet. Effectively disables the geofence.
    pub fn unrestricted() -> Self {
        Self::new(-90.0, 90.0, -180.0, 180.0)
    }

    /// Whether a fix falls inside the region. Edges count as inside.
    pub fn contains(&self, fix: &GeoFix) -> bool {
        fix.lat >= self.min_lat
            && fix.lat <= self.max_lat
            && fix.lon >= self.min_lon
            && fix.lon <= self.max_lon
    }
}

/// Signature capture policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Region a signature's captured location must fall inside.
    pub region: BoundingRegion,
    /// Accept signatures whose location could not be determined.
    pub allow_unknown_location: bool,
    /// Delivery attempt budget per signature.
    pub max_attempts: u32,
}

impl SigningConfig {
    /// Default delivery attempt budget.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Policy for the given region: unknown locations rejected,
    /// five delivery attempts.
    pub fn new(region: BoundingRegion) -> Self {
        Self {
            region,
            allow_unknown_location: false,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Accept or reject signatures without a usable location fix.
    pub fn with_allow_unknown_location(mut self, allow: bool) -> Self {
        self.allow_unknown_location = allow;
        self
    }

    /// Set the delivery attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self::new(BoundingRegion::unrestricted())
    }
}
