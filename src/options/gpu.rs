use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Adapter power preference forwarded to the GPU instance.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    /// Prefer the integrated / battery-friendly adapter.
    LowPower,
    /// Prefer the discrete / fastest adapter.
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(p: PowerPreference) -> Self {
        match p {
            PowerPreference::LowPower => Self::LowPower,
            PowerPreference::HighPerformance => Self::HighPerformance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Gpu", inline)]
#[serde(default)]
/// GPU adapter selection options.
pub struct GpuOptions {
    /// Adapter power preference.
    #[schemars(title = "Power Preference")]
    pub power_preference: PowerPreference,
    /// Force the compute-emulation backend even when native compute is
    /// available (testing and diagnostics).
    #[schemars(skip)]
    pub force_emulation: bool,
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::LowPower,
            force_emulation: false,
        }
    }
}
