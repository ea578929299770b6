//! Compilation and query settings

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for map compilation and the spatial index
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapConfig {
    /// Maximum gap or overlap (meters) accepted between consecutive geometry segments,
    /// and between the last segment end and the declared road length.
    /// Default: 1e-3
    pub geometry_tolerance: f64,
    /// Arc-length step (meters) used to sample reference lines for the spatial index,
    /// bounding boxes and lane width validation.
    /// Default: 1.0
    pub sampling_step: f64,
    /// Initial half-size of the search window used by `closest_waypoint` when no maximum
    /// distance is given. The window doubles until a lane is found.
    /// Default: 10.0
    pub search_radius: f64,
    /// Golden-section iterations used to refine the closest arc length on a lane.
    /// Default: 40
    pub refinement_iterations: u32,
    /// Build roads and per-road spatial indices on the rayon thread pool.
    /// Default: true
    pub parallel: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            geometry_tolerance: 1e-3,
            sampling_step: 1.0,
            search_radius: 10.0,
            refinement_iterations: 40,
            parallel: true,
        }
    }
}

impl MapConfig {
    /// Sampling step clamped to a usable positive value.
    pub(crate) fn step(&self) -> f64 {
        if self.sampling_step.is_finite() && self.sampling_step > 1e-3 {
            self.sampling_step
        } else {
            1.0
        }
    }
}
