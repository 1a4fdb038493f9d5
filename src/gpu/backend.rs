//! The kernel backend contract and its two implementations.
//!
//! The pipeline is written against [`KernelBackend`]: compile a canonical
//! WGSL compute kernel, then encode launches with bindings and a
//! workgroup grid. [`NativeComputeBackend`] records real compute passes;
//! [`RasterEmulationBackend`] lowers each launch to a full-screen
//! triangle pass whose color attachment is the kernel's output texture.
//!
//! Canonical binding convention: `@binding(0)` is the output storage
//! texture; sampled textures, samplers, and uniform buffers follow.
//! Kernels whose output is a storage buffer only exist on the native
//! backend; their callers carry a CPU fallback.

use std::sync::Arc;

use crate::error::{ArError, ErrorCode, Suggestion};
use crate::gpu::context::GpuContext;
use crate::gpu::convert;
use crate::gpu::shader_composer::{self, ShaderComposer};
use crate::gpu::tracker::{ResourceId, ResourceTracker, ResourceType};

/// Which implementation a backend is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Real compute pipelines and compute passes.
    NativeCompute,
    /// Full-screen render passes emulating compute.
    RasterEmulation,
}

/// How a buffer binding is exposed to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBindingKind {
    /// `var<uniform>`
    Uniform,
    /// `var<storage, read>`
    ReadOnlyStorage,
    /// `var<storage, read_write>`
    Storage,
}

/// One bind-group entry for a kernel launch, in `@binding` order.
pub enum Binding<'a> {
    /// The kernel's write-only output image (always `@binding(0)`).
    StorageTexture(&'a wgpu::TextureView),
    /// A sampled input texture.
    Texture(&'a wgpu::TextureView),
    /// A sampler.
    Sampler(&'a wgpu::Sampler),
    /// A buffer with optional sub-range.
    Buffer {
        /// The bound buffer.
        buffer: &'a wgpu::Buffer,
        /// Binding address space.
        kind: BufferBindingKind,
        /// Offset into the buffer in bytes.
        offset: u64,
        /// Bound size; `None` binds to the end of the buffer.
        size: Option<wgpu::BufferSize>,
    },
}

impl<'a> Binding<'a> {
    /// Whole-buffer uniform binding.
    #[must_use]
    pub fn uniform(buffer: &'a wgpu::Buffer) -> Self {
        Self::Buffer {
            buffer,
            kind: BufferBindingKind::Uniform,
            offset: 0,
            size: None,
        }
    }

    /// Whole-buffer read-only storage binding.
    #[must_use]
    pub fn storage_read(buffer: &'a wgpu::Buffer) -> Self {
        Self::Buffer {
            buffer,
            kind: BufferBindingKind::ReadOnlyStorage,
            offset: 0,
            size: None,
        }
    }

    /// Whole-buffer read-write storage binding.
    #[must_use]
    pub fn storage(buffer: &'a wgpu::Buffer) -> Self {
        Self::Buffer {
            buffer,
            kind: BufferBindingKind::Storage,
            offset: 0,
            size: None,
        }
    }

    fn resource(&self) -> wgpu::BindingResource<'a> {
        match *self {
            Self::StorageTexture(view) | Self::Texture(view) => {
                wgpu::BindingResource::TextureView(view)
            }
            Self::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
            Self::Buffer {
                buffer,
                offset,
                size,
                ..
            } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset,
                size,
            }),
        }
    }
}

/// Description of a kernel to compile.
pub struct KernelDescriptor<'a> {
    /// Debug label used for pipelines and error context.
    pub label: &'a str,
    /// Canonical WGSL compute source (may use `#import`).
    pub source: &'a str,
    /// Compute entry point name.
    pub entry_point: &'a str,
}

enum KernelRepr {
    Compute(wgpu::ComputePipeline),
    Raster(wgpu::RenderPipeline),
}

/// A compiled, executable kernel.
pub struct Kernel {
    label: String,
    workgroup_size: (u32, u32, u32),
    expected_bindings: usize,
    tracker_id: ResourceId,
    repr: KernelRepr,
}

impl Kernel {
    /// The kernel's workgroup size, for grid calculations.
    #[must_use]
    pub fn workgroup_size(&self) -> (u32, u32, u32) {
        self.workgroup_size
    }

    /// Workgroup counts covering a `width x height` image.
    #[must_use]
    pub fn grid_for(&self, width: u32, height: u32) -> (u32, u32, u32) {
        let (wx, wy, _) = self.workgroup_size;
        (width.div_ceil(wx.max(1)), height.div_ceil(wy.max(1)), 1)
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        let _ = ResourceTracker::release(self.tracker_id);
    }
}

/// Capability contract the pipeline requires of a GPU backend.
pub trait KernelBackend: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Compile a canonical kernel for this backend.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `ShaderCompile` when compilation or
    /// conversion fails (the emulation backend rejects storage-buffer
    /// kernels here).
    fn create_kernel(
        &self,
        ctx: &GpuContext,
        composer: &mut ShaderComposer,
        desc: &KernelDescriptor<'_>,
    ) -> Result<Kernel, ArError>;

    /// Encode one launch covering `grid` workgroups.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `InvalidConfig` when the binding
    /// list does not match the kernel's declared bindings.
    fn encode(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        kernel: &Kernel,
        bindings: &[Binding<'_>],
        grid: (u32, u32, u32),
    ) -> Result<(), ArError>;
}

fn check_bindings(kernel: &Kernel, got: usize) -> Result<(), ArError> {
    if got == kernel.expected_bindings {
        Ok(())
    } else {
        Err(ArError::new(
            ErrorCode::InvalidConfig,
            format!("bind layout mismatch for kernel '{}'", kernel.label),
        )
        .with_context("expected", kernel.expected_bindings.to_string())
        .with_context("got", got.to_string()))
    }
}

/// Drain the device's validation error scope into a `ShaderCompile` error.
fn pop_validation(
    device: &wgpu::Device,
    label: &str,
) -> Result<(), ArError> {
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(()),
        Some(e) => Err(ArError::new(
            ErrorCode::ShaderCompile,
            format!("kernel '{label}' failed validation"),
        )
        .with_context("log", e.to_string())),
    }
}

/// Backend recording real compute passes.
pub struct NativeComputeBackend;

impl KernelBackend for NativeComputeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativeCompute
    }

    fn create_kernel(
        &self,
        ctx: &GpuContext,
        composer: &mut ShaderComposer,
        desc: &KernelDescriptor<'_>,
    ) -> Result<Kernel, ArError> {
        let workgroup_size = convert::parse_workgroup_size(desc.source)
            .ok_or_else(|| {
                ArError::new(
                    ErrorCode::ShaderCompile,
                    format!("kernel '{}' lacks @workgroup_size", desc.label),
                )
            })?;
        let expected_bindings = convert::count_bindings(desc.source);

        device_scope(ctx);
        let module = composer.compose(
            &ctx.device,
            desc.label,
            desc.source,
            &format!("{}.wgsl", desc.label),
        )?;
        let pipeline = ctx.device.create_compute_pipeline(
            &wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: None,
                module: &module,
                entry_point: Some(desc.entry_point),
                compilation_options: Default::default(),
                cache: None,
            },
        );
        pop_validation(&ctx.device, desc.label)?;

        let tracker_id = ResourceTracker::register(
            ctx.tag,
            ResourceType::Pipeline,
            desc.label,
            0,
        );
        Ok(Kernel {
            label: desc.label.to_owned(),
            workgroup_size,
            expected_bindings,
            tracker_id,
            repr: KernelRepr::Compute(pipeline),
        })
    }

    fn encode(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        kernel: &Kernel,
        bindings: &[Binding<'_>],
        grid: (u32, u32, u32),
    ) -> Result<(), ArError> {
        check_bindings(kernel, bindings.len())?;
        let KernelRepr::Compute(pipeline) = &kernel.repr else {
            return Err(ArError::new(
                ErrorCode::InvalidState,
                format!("kernel '{}' was built for another backend", kernel.label),
            ));
        };

        let entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
            .iter()
            .enumerate()
            .map(|(i, b)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: b.resource(),
            })
            .collect();
        let bind_group =
            ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&kernel.label),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            });

        let mut pass =
            encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&kernel.label),
                timestamp_writes: None,
            });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(grid.0, grid.1, grid.2);
        Ok(())
    }
}

/// Backend lowering compute launches to full-screen raster passes.
pub struct RasterEmulationBackend;

impl KernelBackend for RasterEmulationBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RasterEmulation
    }

    fn create_kernel(
        &self,
        ctx: &GpuContext,
        composer: &mut ShaderComposer,
        desc: &KernelDescriptor<'_>,
    ) -> Result<Kernel, ArError> {
        let workgroup_size = convert::parse_workgroup_size(desc.source)
            .ok_or_else(|| {
                ArError::new(
                    ErrorCode::ShaderCompile,
                    format!("kernel '{}' lacks @workgroup_size", desc.label),
                )
            })?;
        let expected_bindings = convert::count_bindings(desc.source);

        let inlined = shader_composer::inline_imports(desc.source);
        let converted =
            convert::compute_to_fragment(&inlined, desc.entry_point)?;

        device_scope(ctx);
        let module =
            ctx.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(desc.label),
                    source: wgpu::ShaderSource::Wgsl(converted.source.into()),
                });
        let pipeline = ctx.device.create_render_pipeline(
            &wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some(convert::VERTEX_ENTRY),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some(convert::FRAGMENT_ENTRY),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: converted.target_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            },
        );
        pop_validation(&ctx.device, desc.label)?;

        let tracker_id = ResourceTracker::register(
            ctx.tag,
            ResourceType::Pipeline,
            desc.label,
            0,
        );
        Ok(Kernel {
            label: desc.label.to_owned(),
            workgroup_size,
            expected_bindings,
            tracker_id,
            repr: KernelRepr::Raster(pipeline),
        })
    }

    fn encode(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        kernel: &Kernel,
        bindings: &[Binding<'_>],
        _grid: (u32, u32, u32),
    ) -> Result<(), ArError> {
        check_bindings(kernel, bindings.len())?;
        let KernelRepr::Raster(pipeline) = &kernel.repr else {
            return Err(ArError::new(
                ErrorCode::InvalidState,
                format!("kernel '{}' was built for another backend", kernel.label),
            ));
        };
        let Some(&Binding::StorageTexture(target)) = bindings.first() else {
            return Err(ArError::new(
                ErrorCode::InvalidConfig,
                format!(
                    "emulated kernel '{}' needs its output texture at binding 0",
                    kernel.label
                ),
            ));
        };

        // The output texture is the attachment; the remaining bindings
        // keep their declared indices.
        let entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, b)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: b.resource(),
            })
            .collect();
        let bind_group =
            ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&kernel.label),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&kernel.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            ..Default::default()
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        // One full-screen triangle covers the grid; the kernel's own
        // bounds guard masks any overshoot.
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

fn device_scope(ctx: &GpuContext) {
    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
}

/// Pick the backend for an adapter, honoring the emulation override.
#[must_use]
pub fn select_backend(
    supports_compute: bool,
    force_emulation: bool,
) -> Arc<dyn KernelBackend> {
    if supports_compute && !force_emulation {
        Arc::new(NativeComputeBackend)
    } else {
        if supports_compute {
            log::info!("compute available but emulation forced by options");
        } else {
            log::warn!(
                "adapter lacks compute shaders; using raster emulation \
                 (buffer-writing kernels fall back to CPU)"
            );
        }
        Arc::new(RasterEmulationBackend)
    }
}

impl RasterEmulationBackend {
    /// Emulation cannot express buffer-writing kernels; callers use this
    /// error when skipping straight to their CPU fallback.
    #[must_use]
    pub fn unsupported_buffer_kernel(label: &str) -> ArError {
        ArError::recoverable(
            ErrorCode::ShaderCompile,
            format!(
                "kernel '{label}' writes storage buffers; the emulation \
                 backend cannot lower it"
            ),
        )
        .with_context("reason", "storage-buffer")
        .with_suggestion(Suggestion::new(
            "the detector continues on its CPU path",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selection_prefers_native() {
        assert_eq!(
            select_backend(true, false).kind(),
            BackendKind::NativeCompute
        );
        assert_eq!(
            select_backend(false, false).kind(),
            BackendKind::RasterEmulation
        );
        assert_eq!(
            select_backend(true, true).kind(),
            BackendKind::RasterEmulation
        );
    }
}
