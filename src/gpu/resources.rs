//! Tracked GPU resource wrappers.
//!
//! Thin owners around `wgpu::Texture` and `wgpu::Buffer` that register
//! with the [`ResourceTracker`](crate::gpu::tracker::ResourceTracker) on
//! creation and release their entry (and destroy the GPU object) on drop.

use std::sync::Arc;

use crate::error::{ArError, ErrorCode};
use crate::gpu::context::GpuContext;
use crate::gpu::tracker::{ResourceId, ResourceTracker, ResourceType};

/// Bytes per texel for the formats the pipeline allocates.
#[must_use]
pub fn bytes_per_pixel(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::R8Unorm => 1,
        wgpu::TextureFormat::R32Float | wgpu::TextureFormat::R32Uint => 4,
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => 4,
        wgpu::TextureFormat::Rgba32Float => 16,
        _ => 4,
    }
}

/// A tracked 2-D texture and its default view.
pub struct TrackedTexture {
    texture: Arc<wgpu::Texture>,
    view: wgpu::TextureView,
    id: ResourceId,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

impl TrackedTexture {
    /// Create and register a texture.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `TextureCreate` for zero-sized
    /// dimensions.
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Result<Self, ArError> {
        if width == 0 || height == 0 {
            return Err(ArError::new(
                ErrorCode::TextureCreate,
                format!("zero-sized texture '{label}' ({width}x{height})"),
            ));
        }
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bytes =
            u64::from(width) * u64::from(height) * u64::from(bytes_per_pixel(format));
        let id =
            ResourceTracker::register(ctx.tag, ResourceType::Texture, label, bytes);
        Ok(Self {
            texture: Arc::new(texture),
            view,
            id,
            width,
            height,
            format,
        })
    }

    /// The underlying texture.
    #[must_use]
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// A shareable handle for per-frame export. Subscribers must not
    /// retain it across frames; the texture is destroyed with `self`.
    #[must_use]
    pub fn share(&self) -> Arc<wgpu::Texture> {
        Arc::clone(&self.texture)
    }

    /// The default full-texture view.
    #[must_use]
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Texture width in texels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Texture height in texels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texture format.
    #[must_use]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }
}

impl Drop for TrackedTexture {
    fn drop(&mut self) {
        let _ = ResourceTracker::release(self.id);
        self.texture.destroy();
    }
}

/// A tracked GPU buffer.
pub struct TrackedBuffer {
    buffer: wgpu::Buffer,
    id: ResourceId,
    size: u64,
}

impl TrackedBuffer {
    /// Create and register a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `BufferCreate` for a zero-sized
    /// request.
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<Self, ArError> {
        if size == 0 {
            return Err(ArError::new(
                ErrorCode::BufferCreate,
                format!("zero-sized buffer '{label}'"),
            ));
        }
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        let id =
            ResourceTracker::register(ctx.tag, ResourceType::Buffer, label, size);
        Ok(Self { buffer, id, size })
    }

    /// The underlying buffer.
    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// A cloned handle (wgpu buffers are internally reference-counted),
    /// used to hand readback sources to worker threads.
    #[must_use]
    pub fn share(&self) -> wgpu::Buffer {
        self.buffer.clone()
    }

    /// Buffer size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        let _ = ResourceTracker::release(self.id);
        self.buffer.destroy();
    }
}
