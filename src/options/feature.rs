use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Features", inline)]
#[serde(default)]
/// Sparse feature detection and matching options.
pub struct FeatureOptions {
    /// Corner threshold: a ring pixel must differ from the center by more
    /// than this to count toward the contiguous arc.
    #[schemars(title = "Corner Threshold", range(min = 5, max = 80))]
    pub threshold: u8,
    /// Keypoints kept after non-max suppression, by response.
    #[schemars(title = "Max Keypoints", range(min = 16, max = 4000))]
    pub max_keypoints: usize,
    /// Maximum accepted Hamming distance for a match.
    #[schemars(skip)]
    pub match_max_distance: u32,
    /// Lowe ratio: best distance must be at most this fraction of the
    /// second best.
    #[schemars(title = "Match Ratio", range(min = 0.5, max = 1.0))]
    pub match_ratio: f32,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            threshold: 20,
            max_keypoints: 500,
            match_max_distance: 64,
            match_ratio: 0.75,
        }
    }
}
