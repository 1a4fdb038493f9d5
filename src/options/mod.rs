//! Centralized pipeline options with TOML and preset support.
//!
//! All tweakable settings (camera negotiation, GPU selection, per-detector
//! thresholds, tracking constants) are consolidated here. Options
//! serialize to/from TOML; named presets expand to full configurations.
//! All sub-structs use `#[serde(default)]` so partial TOML files (e.g.
//! only overriding `[plane]`) work correctly.

mod camera;
mod feature;
mod gpu;
mod marker;
mod plane;
mod presets;
mod tracking;

use std::path::Path;

pub use camera::{CameraOptions, Facing};
pub use feature::FeatureOptions;
pub use gpu::{GpuOptions, PowerPreference};
pub use marker::{DictionaryName, MarkerOptions};
pub use plane::PlaneOptions;
pub use presets::Preset;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
pub use tracking::TrackingOptions;

use crate::error::{ArError, ErrorCode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(default)]
/// Light estimation stage options.
pub struct LightOptions {
    /// Whether the light estimation stage runs.
    pub enabled: bool,
}

impl Default for LightOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Top-level options container.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema,
)]
#[serde(default)]
pub struct EngineOptions {
    /// Named preset applied before the explicit sections below.
    #[schemars(skip)]
    pub preset: Option<Preset>,
    /// Camera negotiation parameters.
    pub camera: CameraOptions,
    /// GPU adapter selection.
    pub gpu: GpuOptions,
    /// Marker detection parameters.
    pub marker: MarkerOptions,
    /// Feature detection parameters.
    pub feature: FeatureOptions,
    /// Plane detection parameters.
    pub plane: PlaneOptions,
    /// Confidence and pose smoothing constants.
    pub tracking: TrackingOptions,
    /// Light estimation stage.
    #[schemars(skip)]
    pub light: LightOptions,
}

impl EngineOptions {
    /// Options expanded from a named preset.
    #[must_use]
    pub fn from_preset(preset: Preset) -> Self {
        preset.expand()
    }

    /// Resolve the preset field: expand it, then overlay nothing else.
    ///
    /// Called once by the engine at `initialize`; explicit sections in a
    /// parsed config take precedence because the preset only rewrites the
    /// fields the preset table names.
    #[must_use]
    pub fn resolved(mut self) -> Self {
        if let Some(preset) = self.preset.take() {
            let mut base = preset.expand();
            base.preset = Some(preset);
            // Sections the preset table does not touch keep user values.
            base.marker = self.marker;
            base.feature = self.feature;
            base.tracking = self.tracking;
            base.light = self.light;
            // Preset-driven sections keep the preset values only where
            // the user left defaults.
            if self.camera != CameraOptions::default() {
                base.camera = self.camera;
            }
            if self.gpu != GpuOptions::default() {
                base.gpu = self.gpu;
            }
            if self.plane != PlaneOptions::default() {
                base.plane = self.plane;
            }
            base
        } else {
            self
        }
    }

    /// Validate ranges that the detectors depend on.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `InvalidConfig` naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), ArError> {
        let fail = |field: &str, detail: String| {
            Err(ArError::new(
                ErrorCode::InvalidConfig,
                format!("invalid configuration: {detail}"),
            )
            .with_context("field", field))
        };
        if self.camera.width == 0 || self.camera.height == 0 {
            return fail("camera", "resolution must be non-zero".into());
        }
        if self.camera.frame_rate == 0 {
            return fail("camera.frame_rate", "frame rate must be non-zero".into());
        }
        if self.marker.max_aspect < 1.0 {
            return fail(
                "marker.max_aspect",
                format!("aspect limit {} below 1.0", self.marker.max_aspect),
            );
        }
        if self.marker.min_perimeter >= self.marker.max_perimeter {
            return fail(
                "marker.min_perimeter",
                "perimeter range is empty".into(),
            );
        }
        if self.plane.iterations == 0 {
            return fail("plane.iterations", "need at least one trial".into());
        }
        if !(0.0..=1.0).contains(&self.tracking.confidence_alpha) {
            return fail(
                "tracking.confidence_alpha",
                "alpha outside [0, 1]".into(),
            );
        }
        Ok(())
    }

    /// Generate JSON Schema describing the UI-exposed options.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(EngineOptions)
    }

    /// Load options from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `InvalidConfig` on I/O or parse
    /// failure.
    pub fn load(path: &Path) -> Result<Self, ArError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArError::new(ErrorCode::InvalidConfig, e.to_string())
                .with_context("path", path.display().to_string())
        })?;
        toml::from_str(&content).map_err(|e| {
            ArError::new(ErrorCode::InvalidConfig, e.to_string())
                .with_context("path", path.display().to_string())
        })
    }

    /// Save options to a TOML file (pretty-printed).
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `InvalidConfig` on serialization or
    /// I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), ArError> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            ArError::new(ErrorCode::InvalidConfig, e.to_string())
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ArError::new(ErrorCode::InvalidConfig, e.to_string())
            })?;
        }
        std::fs::write(path, content)
            .map_err(|e| ArError::new(ErrorCode::InvalidConfig, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let opts = EngineOptions::default();
        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed: EngineOptions = toml::from_str(&toml_str).unwrap();
        assert_eq!(opts, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r"
[plane]
iterations = 64
";
        let opts: EngineOptions = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.plane.iterations, 64);
        // Everything else should be default
        assert_eq!(opts.camera.width, 640);
        assert_eq!(opts.marker.threshold_window, 15);
    }

    #[test]
    fn preset_in_toml_expands_on_resolve() {
        let toml_str = r#"preset = "desktop""#;
        let opts: EngineOptions = toml::from_str(toml_str).unwrap();
        let resolved = opts.resolved();
        assert_eq!(resolved.camera.width, 1280);
        assert_eq!(resolved.camera.frame_rate, 60);
        assert_eq!(
            resolved.gpu.power_preference,
            PowerPreference::HighPerformance
        );
        assert_eq!(resolved.plane.iterations, 256);
    }

    #[test]
    fn explicit_camera_overrides_preset() {
        let toml_str = r#"
preset = "mobile"

[camera]
width = 800
height = 600
"#;
        let resolved: EngineOptions =
            toml::from_str::<EngineOptions>(toml_str).unwrap().resolved();
        assert_eq!(resolved.camera.width, 800);
        // Non-camera preset effects still apply.
        assert_eq!(resolved.plane.iterations, 128);
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let mut opts = EngineOptions::default();
        opts.camera.width = 0;
        assert_eq!(
            opts.validate().unwrap_err().code(),
            ErrorCode::InvalidConfig
        );

        let mut opts = EngineOptions::default();
        opts.marker.min_perimeter = 5000.0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn schema_has_expected_properties() {
        let schema_value =
            serde_json::to_value(EngineOptions::json_schema()).unwrap();
        let props = schema_value["properties"].as_object().unwrap();
        assert!(props.contains_key("camera"));
        assert!(props.contains_key("gpu"));
        assert!(props.contains_key("marker"));
        assert!(props.contains_key("plane"));
        // Skipped sections should be absent
        assert!(!props.contains_key("preset"));
        assert!(!props.contains_key("light"));
    }
}
