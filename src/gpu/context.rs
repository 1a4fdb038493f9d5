//! Headless wgpu initialization and submission helpers.

use crate::error::{ArError, ErrorCode, Suggestion};
use crate::gpu::tracker::EngineTag;

/// Owns the core wgpu resources: adapter info, device, and queue.
///
/// Unlike a renderer there is no surface; every pipeline output is an
/// offscreen texture or a readback buffer.
pub struct GpuContext {
    /// The wgpu logical device.
    pub device: wgpu::Device,
    /// The wgpu command queue.
    pub queue: wgpu::Queue,
    /// Adapter description reported by the platform.
    pub adapter_info: wgpu::AdapterInfo,
    /// Whether the adapter exposes native compute shaders.
    pub supports_compute: bool,
    /// Tracker tag scoping every resource this context creates.
    pub tag: EngineTag,
}

impl GpuContext {
    /// Create a headless context honoring the power preference.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `GpuAdapterFailed` when no adapter
    /// matches, or `GpuDeviceFailed` when the device request is refused.
    pub async fn new(
        power_preference: wgpu::PowerPreference,
        tag: EngineTag,
    ) -> Result<Self, ArError> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                ArError::new(
                    ErrorCode::GpuAdapterFailed,
                    format!("no compatible GPU adapter found: {e}"),
                )
                .with_suggestion(Suggestion::new(
                    "verify that a GPU driver with Vulkan, Metal, or GL \
                     support is installed",
                ))
            })?;

        let adapter_info = adapter.get_info();
        let supports_compute = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);

        // Downlevel adapters (the emulation target) get conservative
        // limits so the same kernels validate everywhere.
        let required_limits = if supports_compute {
            wgpu::Limits::default()
        } else {
            wgpu::Limits::downlevel_webgl2_defaults()
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("argus device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                ArError::new(
                    ErrorCode::GpuDeviceFailed,
                    format!("device request failed: {e}"),
                )
                .with_context("adapter", adapter_info.name.clone())
            })?;

        device.on_uncaptured_error(Box::new(|e| {
            log::error!("uncaptured GPU error: {e}");
        }));

        log::info!(
            "GPU context ready on '{}' ({:?}), compute={}",
            adapter_info.name,
            adapter_info.backend,
            supports_compute
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            supports_compute,
            tag,
        })
    }

    /// Create a new command encoder for recording GPU commands.
    #[must_use]
    pub fn create_encoder(&self) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            })
    }

    /// Finish the encoder and submit its command buffer to the GPU queue.
    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        let _ = self.queue.submit(std::iter::once(encoder.finish()));
    }
}
