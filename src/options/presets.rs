use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{CameraOptions, EngineOptions, PowerPreference};

/// Named configuration presets.
///
/// Each expands to a full camera + GPU + detector configuration. Choosing
/// between them is the host application's concern.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Phone-class device, battery aware.
    Mobile,
    /// Desktop with a discrete or capable integrated GPU.
    Desktop,
    /// Maximum detection quality at 1080p.
    HighQuality,
    /// Minimum latency at reduced quality.
    LowLatency,
    /// Lowest possible power draw.
    BatterySaver,
}

impl Preset {
    /// Expand the preset into a full options record.
    #[must_use]
    pub fn expand(self) -> EngineOptions {
        let mut opts = EngineOptions::default();
        let (w, h, rate, power, iters, min_inliers) = match self {
            Self::Mobile => (640, 480, 30, PowerPreference::LowPower, 128, 100),
            Self::Desktop => {
                (1280, 720, 60, PowerPreference::HighPerformance, 256, 150)
            }
            Self::HighQuality => {
                (1920, 1080, 60, PowerPreference::HighPerformance, 512, 200)
            }
            Self::LowLatency => {
                (640, 480, 120, PowerPreference::HighPerformance, 64, 50)
            }
            Self::BatterySaver => {
                (480, 360, 15, PowerPreference::LowPower, 64, 50)
            }
        };
        opts.camera = CameraOptions {
            width: w,
            height: h,
            frame_rate: rate,
            ..CameraOptions::default()
        };
        opts.gpu.power_preference = power;
        opts.plane.iterations = iters;
        opts.plane.min_inliers = min_inliers;
        opts
    }
}
