//! Beacon distance to proximity tier classification
//!
//! Tiers use half-open intervals: `[0, near)` is immediate, `[near, far)` is
//! near, `[far, ∞)` is far. A reading exactly on a threshold therefore lands
//! in the farther tier.

use crate::domain::types::{GeoError, Proximity};

/// Default upper bound (exclusive) of the immediate tier, in metres
pub const DEFAULT_NEAR_THRESHOLD_M: f64 = 0.5;
/// Default upper bound (exclusive) of the near tier, in metres
pub const DEFAULT_FAR_THRESHOLD_M: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityClassifier {
    near_threshold_m: f64,
    far_threshold_m: f64,
}

impl Default for ProximityClassifier {
    fn default() -> Self {
        Self { near_threshold_m: DEFAULT_NEAR_THRESHOLD_M, far_threshold_m: DEFAULT_FAR_THRESHOLD_M }
    }
}

impl ProximityClassifier {
    /// Build a classifier; thresholds are reordered if given inverted
    pub fn new(near_threshold_m: f64, far_threshold_m: f64) -> Self {
        if near_threshold_m <= far_threshold_m {
            Self { near_threshold_m, far_threshold_m }
        } else {
            Self { near_threshold_m: far_threshold_m, far_threshold_m: near_threshold_m }
        }
    }

    pub fn near_threshold_m(&self) -> f64 {
        self.near_threshold_m
    }

    pub fn far_threshold_m(&self) -> f64 {
        self.far_threshold_m
    }

    /// Classify a distance reading
    ///
    /// Negative and non-finite readings are rejected rather than coerced.
    pub fn classify(&self, distance_m: f64) -> Result<Proximity, GeoError> {
        if !distance_m.is_finite() || distance_m < 0.0 {
            return Err(GeoError::InvalidDistance(distance_m));
        }
        Ok(if distance_m < self.near_threshold_m {
            Proximity::Immediate
        } else if distance_m < self.far_threshold_m {
            Proximity::Near
        } else {
            Proximity::Far
        })
    }

    /// Classify an optional reading; `None` means "no update"
    #[inline]
    pub fn classify_reading(&self, distance_m: Option<f64>) -> Option<Proximity> {
        distance_m.and_then(|d| self.classify(d).ok())
    }
}
