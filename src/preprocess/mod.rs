//! GPU preprocessing: RGBA to luminance, separable Gaussian blur, and
//! adaptive threshold.
//!
//! The preprocessor owns the shared intermediate textures every detector
//! samples (`gray`, `blurred`, `binary`) and encodes the three kernel
//! launches at the head of each frame. CPU reference implementations of
//! the same operators live in [`cpu`] for still-image detection, the
//! emulation fallbacks, and tests.

/// CPU reference implementations of the preprocessing operators.
pub mod cpu;

use bytemuck::{Pod, Zeroable};

use crate::error::ArError;
use crate::gpu::backend::{Binding, Kernel, KernelBackend, KernelDescriptor};
use crate::gpu::context::GpuContext;
use crate::gpu::resources::{TrackedBuffer, TrackedTexture};
use crate::gpu::shader_composer::ShaderComposer;
use crate::options::MarkerOptions;

const GRAYSCALE_SRC: &str =
    include_str!("../../assets/shaders/compute/grayscale.wgsl");
const BLUR_SRC: &str = include_str!("../../assets/shaders/compute/blur.wgsl");
const THRESHOLD_SRC: &str =
    include_str!("../../assets/shaders/compute/threshold.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BlurParams {
    direction: [i32; 2],
    _pad: [i32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ThresholdParams {
    radius: i32,
    c: f32,
    _pad: [f32; 2],
}

/// Clamp an adaptive threshold window to an odd positive value.
#[must_use]
pub fn clamp_window(window: u32) -> u32 {
    let w = window.max(3);
    if w % 2 == 0 {
        w + 1
    } else {
        w
    }
}

fn intermediate_usage() -> wgpu::TextureUsages {
    // STORAGE for the native path, RENDER_ATTACHMENT for the emulated
    // path, TEXTURE_BINDING to be sampled downstream, COPY_SRC for
    // readback.
    wgpu::TextureUsages::STORAGE_BINDING
        | wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_SRC
}

/// Owns the shared preprocessing textures and kernels.
pub struct Preprocessor {
    gray: TrackedTexture,
    blur_scratch: TrackedTexture,
    blurred: TrackedTexture,
    binary: TrackedTexture,
    gray_kernel: Kernel,
    blur_kernel: Kernel,
    threshold_kernel: Kernel,
    blur_h_params: TrackedBuffer,
    blur_v_params: TrackedBuffer,
    threshold_params: TrackedBuffer,
    width: u32,
    height: u32,
}

impl Preprocessor {
    /// Compile the kernels and allocate intermediates for `width x height`.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] on kernel compilation or allocation failure.
    pub fn new(
        ctx: &GpuContext,
        backend: &dyn KernelBackend,
        composer: &mut ShaderComposer,
        width: u32,
        height: u32,
        opts: &MarkerOptions,
    ) -> Result<Self, ArError> {
        let make_tex = |label: &str| {
            TrackedTexture::new(
                ctx,
                label,
                width,
                height,
                wgpu::TextureFormat::R32Float,
                intermediate_usage(),
            )
        };
        let gray = make_tex("preprocess gray")?;
        let blur_scratch = make_tex("preprocess blur scratch")?;
        let blurred = make_tex("preprocess blurred")?;
        let binary = make_tex("preprocess binary")?;

        let gray_kernel = backend.create_kernel(
            ctx,
            composer,
            &KernelDescriptor {
                label: "grayscale",
                source: GRAYSCALE_SRC,
                entry_point: "main",
            },
        )?;
        let blur_kernel = backend.create_kernel(
            ctx,
            composer,
            &KernelDescriptor {
                label: "gaussian blur",
                source: BLUR_SRC,
                entry_point: "main",
            },
        )?;
        let threshold_kernel = backend.create_kernel(
            ctx,
            composer,
            &KernelDescriptor {
                label: "adaptive threshold",
                source: THRESHOLD_SRC,
                entry_point: "main",
            },
        )?;

        let uniform_usage =
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST;
        let blur_h_params =
            TrackedBuffer::new(ctx, "blur h params", 16, uniform_usage)?;
        let blur_v_params =
            TrackedBuffer::new(ctx, "blur v params", 16, uniform_usage)?;
        let threshold_params =
            TrackedBuffer::new(ctx, "threshold params", 16, uniform_usage)?;

        ctx.queue.write_buffer(
            blur_h_params.buffer(),
            0,
            bytemuck::bytes_of(&BlurParams {
                direction: [1, 0],
                _pad: [0, 0],
            }),
        );
        ctx.queue.write_buffer(
            blur_v_params.buffer(),
            0,
            bytemuck::bytes_of(&BlurParams {
                direction: [0, 1],
                _pad: [0, 0],
            }),
        );

        let this = Self {
            gray,
            blur_scratch,
            blurred,
            binary,
            gray_kernel,
            blur_kernel,
            threshold_kernel,
            blur_h_params,
            blur_v_params,
            threshold_params,
            width,
            height,
        };
        this.apply_options(ctx, opts);
        Ok(this)
    }

    /// Push threshold parameters (window clamped to odd positive).
    pub fn apply_options(&self, ctx: &GpuContext, opts: &MarkerOptions) {
        let window = clamp_window(opts.threshold_window);
        let params = ThresholdParams {
            radius: (window / 2) as i32,
            // Options keep the constant in 8-bit units to match the
            // classic formulation; kernels work in [0, 1].
            c: opts.threshold_constant / 255.0,
            _pad: [0.0, 0.0],
        };
        ctx.queue.write_buffer(
            self.threshold_params.buffer(),
            0,
            bytemuck::bytes_of(&params),
        );
    }

    /// Encode grayscale, two blur passes, and the adaptive threshold.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] when a kernel launch cannot be encoded.
    pub fn encode(
        &self,
        ctx: &GpuContext,
        backend: &dyn KernelBackend,
        encoder: &mut wgpu::CommandEncoder,
        frame_view: &wgpu::TextureView,
    ) -> Result<(), ArError> {
        let grid = self.gray_kernel.grid_for(self.width, self.height);
        backend.encode(
            ctx,
            encoder,
            &self.gray_kernel,
            &[
                Binding::StorageTexture(self.gray.view()),
                Binding::Texture(frame_view),
            ],
            grid,
        )?;
        backend.encode(
            ctx,
            encoder,
            &self.blur_kernel,
            &[
                Binding::StorageTexture(self.blur_scratch.view()),
                Binding::Texture(self.gray.view()),
                Binding::uniform(self.blur_h_params.buffer()),
            ],
            grid,
        )?;
        backend.encode(
            ctx,
            encoder,
            &self.blur_kernel,
            &[
                Binding::StorageTexture(self.blurred.view()),
                Binding::Texture(self.blur_scratch.view()),
                Binding::uniform(self.blur_v_params.buffer()),
            ],
            grid,
        )?;
        backend.encode(
            ctx,
            encoder,
            &self.threshold_kernel,
            &[
                Binding::StorageTexture(self.binary.view()),
                Binding::Texture(self.blurred.view()),
                Binding::uniform(self.threshold_params.buffer()),
            ],
            grid,
        )?;
        Ok(())
    }

    /// The luminance texture.
    #[must_use]
    pub fn gray(&self) -> &TrackedTexture {
        &self.gray
    }

    /// The blurred luminance texture.
    #[must_use]
    pub fn blurred(&self) -> &TrackedTexture {
        &self.blurred
    }

    /// The binary (thresholded) texture.
    #[must_use]
    pub fn binary(&self) -> &TrackedTexture {
        &self.binary
    }

    /// Processed frame width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Processed frame height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_clamps_to_odd_positive() {
        assert_eq!(clamp_window(0), 3);
        assert_eq!(clamp_window(3), 3);
        assert_eq!(clamp_window(14), 15);
        assert_eq!(clamp_window(15), 15);
    }

    #[test]
    fn shipped_kernels_compose() {
        let mut composer = ShaderComposer::new();
        for (src, path) in [
            (GRAYSCALE_SRC, "grayscale.wgsl"),
            (BLUR_SRC, "blur.wgsl"),
            (THRESHOLD_SRC, "threshold.wgsl"),
        ] {
            let module = composer.compose_naga(src, path);
            assert!(module.is_ok(), "{path}: {:?}", module.err());
        }
    }

    #[test]
    fn shipped_kernels_lower_to_fragment() {
        use crate::gpu::{convert, shader_composer};
        for (src, path) in [
            (GRAYSCALE_SRC, "grayscale.wgsl"),
            (BLUR_SRC, "blur.wgsl"),
            (THRESHOLD_SRC, "threshold.wgsl"),
        ] {
            let inlined = shader_composer::inline_imports(src);
            let converted = convert::compute_to_fragment(&inlined, "main");
            assert!(converted.is_ok(), "{path}: {:?}", converted.err());
            let parsed = naga::front::wgsl::parse_str(&converted.unwrap().source);
            assert!(parsed.is_ok(), "{path}: {:?}", parsed.err());
        }
    }
}
