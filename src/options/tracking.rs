use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Tracking", inline)]
#[serde(default)]
/// Confidence fusion and pose smoothing constants.
pub struct TrackingOptions {
    /// EMA weight of a new confidence observation.
    #[schemars(title = "Confidence Alpha", range(min = 0.05, max = 1.0))]
    pub confidence_alpha: f32,
    /// Kalman process noise (squared meters per second).
    #[schemars(skip)]
    pub process_noise: f32,
    /// Kalman measurement noise (squared meters).
    #[schemars(skip)]
    pub measurement_noise: f32,
    /// Slerp weight of a new orientation observation.
    #[schemars(skip)]
    pub orientation_alpha: f32,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            confidence_alpha: 0.3,
            process_noise: 0.01,
            measurement_noise: 0.05,
            orientation_alpha: 0.3,
        }
    }
}
