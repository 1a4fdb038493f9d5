use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pre-shipped ArUco dictionary selection.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryName {
    /// 4x4 payload, 50 codes.
    Dict4x4_50,
    /// 5x5 payload, 100 codes.
    Dict5x5_100,
    /// 6x6 payload, 250 codes.
    Dict6x6_250,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Markers", inline)]
#[serde(default)]
/// Fiducial marker detection options.
pub struct MarkerOptions {
    /// Dictionary the decoder matches against.
    #[schemars(title = "Dictionary")]
    pub dictionary: DictionaryName,
    /// Adaptive threshold window edge in pixels. Clamped to an odd
    /// positive value at use sites.
    #[schemars(title = "Threshold Window", range(min = 3, max = 51))]
    pub threshold_window: u32,
    /// Constant subtracted from the local mean before thresholding.
    #[schemars(title = "Threshold Constant", range(min = 0.0, max = 30.0))]
    pub threshold_constant: f32,
    /// Gaussian blur sigma applied before thresholding.
    #[schemars(skip)]
    pub blur_sigma: f32,
    /// Minimum accepted contour perimeter in pixels.
    #[schemars(skip)]
    pub min_perimeter: f32,
    /// Maximum accepted contour perimeter in pixels.
    #[schemars(skip)]
    pub max_perimeter: f32,
    /// Minimum mean quad edge length in pixels.
    #[schemars(skip)]
    pub min_edge: f32,
    /// Maximum quad aspect ratio.
    #[schemars(skip)]
    pub max_aspect: f32,
    /// Maximum quads decoded per batched GPU dispatch.
    #[schemars(skip)]
    pub max_batch: usize,
    /// Physical marker edge length in meters, used by the pose solver.
    #[schemars(title = "Marker Size (m)", range(min = 0.005, max = 1.0))]
    pub marker_size_m: f32,
    /// Updates required before a marker is confirmed.
    #[schemars(skip)]
    pub confirm_updates: u32,
    /// Milliseconds without a decode before a marker is reported lost.
    #[schemars(title = "Loss Timeout (ms)", range(min = 50, max = 5000))]
    pub loss_timeout_ms: u64,
    /// Further milliseconds before a lost marker is removed.
    #[schemars(skip)]
    pub removal_timeout_ms: u64,
}

impl Default for MarkerOptions {
    fn default() -> Self {
        Self {
            dictionary: DictionaryName::Dict4x4_50,
            threshold_window: 15,
            threshold_constant: 7.0,
            blur_sigma: 1.0,
            min_perimeter: 80.0,
            max_perimeter: 4000.0,
            min_edge: 20.0,
            max_aspect: 2.0,
            max_batch: 32,
            marker_size_m: 0.05,
            confirm_updates: 1,
            loss_timeout_ms: 500,
            removal_timeout_ms: 1500,
        }
    }
}
