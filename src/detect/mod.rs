//! Detector plugins and their scheduling contract.
//!
//! A detector is a plugin with a name, a version, a priority, and
//! optional dependencies on other plugins. Per frame the engine asks each
//! enabled plugin to `encode` its GPU stages, submits once, then calls
//! `collect`, where the plugin launches its single-flight CPU job (if
//! idle) and folds its *latest completed* result into the frame outputs.
//! Detection therefore trails the camera by one frame; records carry a
//! `stale` flag while a newer job is still running.

/// Sparse feature detection (FAST + oriented binary descriptors).
pub mod feature;
/// Ambient light estimation from downsampled luminance.
pub mod light;
/// Fiducial marker detection.
pub mod marker;
/// RANSAC plane detection and tracking.
pub mod plane;
/// Single-flight background worker shared by the detectors.
pub mod worker;

use glam::Vec3;

use crate::error::{ArError, ErrorCode};
use crate::events::ArEvent;
use crate::frame::{DetectedPlane, FeatureSet, LightEstimate, TrackedMarker};
use crate::gpu::backend::KernelBackend;
use crate::gpu::context::GpuContext;
use crate::gpu::shader_composer::ShaderComposer;
use crate::math::CameraIntrinsics;
use crate::options::EngineOptions;
use crate::preprocess::Preprocessor;

/// Everything a plugin needs at initialization.
pub struct PluginSetup<'a> {
    /// GPU device and queue.
    pub ctx: &'a GpuContext,
    /// The selected kernel backend.
    pub backend: &'a dyn KernelBackend,
    /// Shared shader composer.
    pub composer: &'a mut ShaderComposer,
    /// Resolved engine options.
    pub options: &'a EngineOptions,
    /// Negotiated frame width.
    pub width: u32,
    /// Negotiated frame height.
    pub height: u32,
    /// Camera intrinsics (assumed or calibrated).
    pub intrinsics: CameraIntrinsics,
}

/// Per-frame inputs handed to `encode`.
pub struct FrameInputs<'a> {
    /// GPU device and queue.
    pub ctx: &'a GpuContext,
    /// The selected kernel backend.
    pub backend: &'a dyn KernelBackend,
    /// The frame's command encoder (pre-submission).
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// View of the imported camera frame.
    pub camera_view: &'a wgpu::TextureView,
    /// Shared preprocessing products.
    pub preprocess: &'a Preprocessor,
    /// Frame timestamp in microseconds.
    pub timestamp_us: u64,
}

/// Accumulated detector outputs for one frame.
#[derive(Default)]
pub struct FrameOutputs {
    /// Marker list, set by the marker plugin.
    pub markers: Option<Vec<TrackedMarker>>,
    /// Plane list, set by the plane plugin.
    pub planes: Option<Vec<DetectedPlane>>,
    /// Feature set, set by the feature plugin.
    pub features: Option<FeatureSet>,
    /// Light estimate, set by the light plugin.
    pub light: Option<LightEstimate>,
    /// Per-detection events to emit in plugin order.
    pub events: Vec<ArEvent>,
}

/// A detection stage in the per-frame pipeline.
pub trait DetectorPlugin: Send {
    /// Unique plugin name (also the per-plugin options key).
    fn name(&self) -> &'static str;

    /// Plugin version string.
    fn version(&self) -> &'static str {
        "0.1.0"
    }

    /// Lower priorities run earlier among independent plugins.
    fn priority(&self) -> i32 {
        100
    }

    /// Names of plugins that must initialize (and run) before this one.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Compile kernels and allocate per-plugin resources.
    ///
    /// # Errors
    ///
    /// Failures surface from `Engine::initialize` as `PluginInitFailed`.
    fn initialize(&mut self, setup: &mut PluginSetup<'_>) -> Result<(), ArError>;

    /// Record this plugin's GPU stages for the current frame.
    ///
    /// # Errors
    ///
    /// Recoverable errors are emitted on the bus; the frame continues.
    fn encode(&mut self, frame: &mut FrameInputs<'_>) -> Result<(), ArError>;

    /// Post-submission: launch the CPU job if idle and fold the latest
    /// completed result into `out`.
    ///
    /// # Errors
    ///
    /// Recoverable errors are emitted on the bus; the frame continues.
    fn collect(
        &mut self,
        ctx: &GpuContext,
        timestamp_us: u64,
        out: &mut FrameOutputs,
    ) -> Result<(), ArError>;

    /// Whether a CPU job is currently in flight.
    fn busy(&self) -> bool {
        false
    }

    /// Supply an external point cloud (plane detection input).
    fn supply_points(
        &mut self,
        _points: Vec<Vec3>,
        _normals: Option<Vec<Vec3>>,
    ) {
    }

    /// Release plugin resources. Called from `Engine::destroy`.
    fn destroy(&mut self, ctx: &GpuContext);
}

/// Topological initialization order over the registered plugins:
/// dependencies first, ties broken by `(priority, registration index)`.
///
/// # Errors
///
/// Returns [`ArError`] with code `PluginMissing` for an unknown
/// dependency name and `PluginInitFailed` for a dependency cycle.
pub fn initialization_order(
    plugins: &[Box<dyn DetectorPlugin>],
) -> Result<Vec<usize>, ArError> {
    let names: Vec<&str> = plugins.iter().map(|p| p.name()).collect();
    let index_of = |name: &str| names.iter().position(|n| *n == name);

    // Edges dep -> plugin; count unmet dependencies per plugin.
    let mut unmet: Vec<usize> = vec![0; plugins.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); plugins.len()];
    for (i, plugin) in plugins.iter().enumerate() {
        for dep in plugin.dependencies() {
            let Some(j) = index_of(dep) else {
                return Err(ArError::new(
                    ErrorCode::PluginMissing,
                    format!(
                        "plugin '{}' depends on unregistered plugin '{dep}'",
                        plugin.name()
                    ),
                ));
            };
            unmet[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..plugins.len())
        .filter(|&i| unmet[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(plugins.len());
    while !ready.is_empty() {
        // Deterministic tie-break: lowest (priority, index) next.
        ready.sort_by_key(|&i| (plugins[i].priority(), i));
        let next = ready.remove(0);
        order.push(next);
        for &dep in &dependents[next] {
            unmet[dep] -= 1;
            if unmet[dep] == 0 {
                ready.push(dep);
            }
        }
    }

    if order.len() != plugins.len() {
        return Err(ArError::new(
            ErrorCode::PluginInitFailed,
            "plugin dependency cycle detected",
        ));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        name: &'static str,
        priority: i32,
        deps: &'static [&'static str],
    }

    impl DetectorPlugin for Dummy {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn dependencies(&self) -> &'static [&'static str] {
            self.deps
        }
        fn initialize(
            &mut self,
            _setup: &mut PluginSetup<'_>,
        ) -> Result<(), ArError> {
            Ok(())
        }
        fn encode(&mut self, _frame: &mut FrameInputs<'_>) -> Result<(), ArError> {
            Ok(())
        }
        fn collect(
            &mut self,
            _ctx: &GpuContext,
            _timestamp_us: u64,
            _out: &mut FrameOutputs,
        ) -> Result<(), ArError> {
            Ok(())
        }
        fn destroy(&mut self, _ctx: &GpuContext) {}
    }

    fn boxed(
        name: &'static str,
        priority: i32,
        deps: &'static [&'static str],
    ) -> Box<dyn DetectorPlugin> {
        Box::new(Dummy {
            name,
            priority,
            deps,
        })
    }

    #[test]
    fn orders_by_priority_without_dependencies() {
        let plugins = vec![
            boxed("slow", 200, &[]),
            boxed("fast", 10, &[]),
            boxed("mid", 100, &[]),
        ];
        let order = initialization_order(&plugins).unwrap();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn dependencies_override_priority() {
        let plugins = vec![
            boxed("features", 10, &["markers"]),
            boxed("markers", 100, &[]),
        ];
        let order = initialization_order(&plugins).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn missing_dependency_is_reported() {
        let plugins = vec![boxed("a", 0, &["ghost"])];
        let err = initialization_order(&plugins).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PluginMissing);
    }

    #[test]
    fn cycles_are_rejected() {
        let plugins = vec![boxed("a", 0, &["b"]), boxed("b", 0, &["a"])];
        let err = initialization_order(&plugins).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PluginInitFailed);
    }
}
