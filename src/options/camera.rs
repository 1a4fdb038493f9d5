use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which way the requested capture device faces.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Front-facing (selfie) camera.
    User,
    /// Rear (world-facing) camera.
    Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Camera", inline)]
#[serde(default)]
/// Requested capture parameters. Actual negotiated values may differ and
/// are reported by the camera source after initialization.
pub struct CameraOptions {
    /// Requested frame width in pixels.
    #[schemars(title = "Width", range(min = 160, max = 3840))]
    pub width: u32,
    /// Requested frame height in pixels.
    #[schemars(title = "Height", range(min = 120, max = 2160))]
    pub height: u32,
    /// Requested device facing.
    #[schemars(title = "Facing")]
    pub facing: Facing,
    /// Requested frame rate in frames per second.
    #[schemars(title = "Frame Rate", range(min = 1, max = 240))]
    pub frame_rate: u32,
    /// Assumed horizontal field of view in degrees, used to derive
    /// intrinsics until a calibration is supplied.
    #[schemars(skip)]
    pub assumed_hfov_deg: f32,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing: Facing::Environment,
            frame_rate: 30,
            assumed_hfov_deg: crate::math::projection::DEFAULT_HFOV_DEG,
        }
    }
}
