use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Planes", inline)]
#[serde(default)]
/// RANSAC plane detection and tracking options.
pub struct PlaneOptions {
    /// RANSAC trial count per frame.
    #[schemars(title = "Iterations", range(min = 16, max = 2048))]
    pub iterations: u32,
    /// Inlier distance threshold in meters.
    #[schemars(title = "Distance Threshold", range(min = 0.001, max = 0.2))]
    pub distance_threshold: f32,
    /// Maximum angle in degrees between a point normal and the plane
    /// normal for the point to count as an inlier.
    #[schemars(skip)]
    pub normal_threshold_deg: f32,
    /// Minimum inlier count for an accepted candidate.
    #[schemars(title = "Min Inliers", range(min = 10, max = 2000))]
    pub min_inliers: u32,
    /// Maximum planes kept after deduplication.
    #[schemars(skip)]
    pub max_planes: usize,
    /// Milliseconds without a supporting observation before a tracked
    /// plane is removed.
    #[schemars(skip)]
    pub expiry_ms: u64,
    /// Boundary cache freshness window in milliseconds.
    #[schemars(skip)]
    pub boundary_cache_ms: u64,
}

impl Default for PlaneOptions {
    fn default() -> Self {
        Self {
            iterations: 256,
            distance_threshold: 0.02,
            normal_threshold_deg: 25.0,
            min_inliers: 100,
            max_planes: 5,
            expiry_ms: 2000,
            boundary_cache_ms: 1000,
        }
    }
}
