//! Platform capability diagnostics.
//!
//! Enumerates what the host can provide (GPU adapter, compute support,
//! camera availability) and derives recommendation strings from what is
//! missing. Available both before and after initialization; the
//! pre-init path probes a throwaway adapter.

use crate::gpu::backend::BackendKind;

/// Capability report returned by `Engine::diagnostics`.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// Adapter name, when one could be acquired.
    pub adapter: Option<String>,
    /// Whether the adapter exposes native compute shaders.
    pub supports_compute: bool,
    /// The backend the engine selected (post-init only).
    pub backend: Option<BackendKind>,
    /// Whether a live capture backend is compiled in.
    pub capture_available: bool,
    /// Human-readable recommendations derived from missing capabilities.
    pub recommendations: Vec<String>,
}

impl Diagnostics {
    fn finish(mut self) -> Self {
        if self.adapter.is_none() {
            self.recommendations.push(
                "no GPU adapter found: install or update Vulkan, Metal, or \
                 GL drivers"
                    .to_owned(),
            );
        } else if !self.supports_compute {
            self.recommendations.push(
                "the adapter lacks compute shaders: detection runs through \
                 the raster emulation backend with CPU fallbacks, expect \
                 reduced throughput"
                    .to_owned(),
            );
        }
        if !self.capture_available {
            self.recommendations.push(
                "built without the 'capture' feature: only synthetic camera \
                 sources are available"
                    .to_owned(),
            );
        }
        self
    }

    /// Report for an initialized engine.
    #[must_use]
    pub(crate) fn from_runtime(
        adapter_name: &str,
        supports_compute: bool,
        backend: BackendKind,
    ) -> Self {
        Self {
            adapter: Some(adapter_name.to_owned()),
            supports_compute,
            backend: Some(backend),
            capture_available: cfg!(feature = "capture"),
            recommendations: Vec::new(),
        }
        .finish()
    }

    /// Probe the platform without initializing an engine.
    #[must_use]
    pub(crate) fn probe() -> Self {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions::default(),
        ))
        .ok();
        let (name, supports_compute) = match &adapter {
            Some(a) => (
                Some(a.get_info().name),
                a.get_downlevel_capabilities()
                    .flags
                    .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
            ),
            None => (None, false),
        };
        Self {
            adapter: name,
            supports_compute,
            backend: None,
            capture_available: cfg!(feature = "capture"),
            recommendations: Vec::new(),
        }
        .finish()
    }
}
