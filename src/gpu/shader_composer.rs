//! WGSL composition with `#import` support via naga-oil.
//!
//! Shared WGSL modules are registered at construction; kernels pull them
//! in with `#import argus::<module>::{item}`. The composer produces
//! `naga::Module` IR directly for the native path; the emulation path
//! needs composed *source* text, which [`inline_imports`] provides by
//! splicing module bodies before conversion.

use std::borrow::Cow;

use naga_oil::compose::{
    ComposableModuleDescriptor, Composer, NagaModuleDescriptor,
    ShaderLanguage, ShaderType,
};

use crate::error::{ArError, ErrorCode};

const SAMPLING_SRC: &str =
    include_str!("../../assets/shaders/modules/sampling.wgsl");

/// Wraps `naga_oil::compose::Composer` with the crate's shared modules.
pub struct ShaderComposer {
    composer: Composer,
}

impl Default for ShaderComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderComposer {
    /// Composer with every shared module registered.
    ///
    /// Module registration failures are programming errors in shipped
    /// sources; they surface as `ShaderCompile` from [`compose`] because
    /// the failed module is simply absent.
    #[must_use]
    pub fn new() -> Self {
        let mut composer = Composer::default();
        let result = composer.add_composable_module(ComposableModuleDescriptor {
            source: SAMPLING_SRC,
            file_path: "modules/sampling.wgsl",
            language: ShaderLanguage::Wgsl,
            ..Default::default()
        });
        if let Err(e) = result {
            log::error!("failed to register shader module 'sampling': {e:?}");
        }
        Self { composer }
    }

    /// Compose a kernel source (which may contain `#import` directives)
    /// into a `wgpu::ShaderModule` ready for pipeline creation.
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `ShaderCompile` carrying the
    /// composer log.
    pub fn compose(
        &mut self,
        device: &wgpu::Device,
        label: &str,
        source: &str,
        file_path: &str,
    ) -> Result<wgpu::ShaderModule, ArError> {
        let naga_module = self.compose_naga(source, file_path)?;
        Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Naga(Cow::Owned(naga_module)),
        }))
    }

    /// Compose into `naga::Module` IR without a GPU device (also used by
    /// tests to validate shipped kernels headless).
    ///
    /// # Errors
    ///
    /// Returns [`ArError`] with code `ShaderCompile` on composition
    /// failure.
    pub fn compose_naga(
        &mut self,
        source: &str,
        file_path: &str,
    ) -> Result<naga::Module, ArError> {
        self.composer
            .make_naga_module(NagaModuleDescriptor {
                source,
                file_path,
                shader_type: ShaderType::Wgsl,
                ..Default::default()
            })
            .map_err(|e| {
                ArError::new(
                    ErrorCode::ShaderCompile,
                    format!("shader composition failed: {e}"),
                )
                .with_context("file", file_path)
            })
    }
}

/// Text-level import splicing for the conversion path.
///
/// Replaces each `#import argus::<module>...` line with the module body
/// (minus its `#define_import_path` line). Only the modules this crate
/// ships are resolvable.
#[must_use]
pub fn inline_imports(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#import argus::sampling") {
            for module_line in SAMPLING_SRC.lines() {
                if module_line.trim_start().starts_with("#define_import_path") {
                    continue;
                }
                out.push_str(module_line);
                out.push('\n');
            }
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shader source definitions for all compute kernels in the project.
    /// Each entry is (source, file_path).
    fn all_kernel_sources() -> Vec<(&'static str, &'static str)> {
        vec![
            (
                include_str!("../../assets/shaders/compute/grayscale.wgsl"),
                "grayscale.wgsl",
            ),
            (
                include_str!("../../assets/shaders/compute/blur.wgsl"),
                "blur.wgsl",
            ),
            (
                include_str!("../../assets/shaders/compute/threshold.wgsl"),
                "threshold.wgsl",
            ),
            (
                include_str!("../../assets/shaders/compute/warp.wgsl"),
                "warp.wgsl",
            ),
            (
                include_str!("../../assets/shaders/compute/decode.wgsl"),
                "decode.wgsl",
            ),
            (
                include_str!("../../assets/shaders/compute/fast.wgsl"),
                "fast.wgsl",
            ),
            (
                include_str!("../../assets/shaders/compute/ransac.wgsl"),
                "ransac.wgsl",
            ),
            (
                include_str!("../../assets/shaders/compute/luminance.wgsl"),
                "luminance.wgsl",
            ),
        ]
    }

    #[test]
    fn test_all_kernels_compose() {
        let mut composer = ShaderComposer::new();
        for (source, file_path) in all_kernel_sources() {
            let module = composer.compose_naga(source, file_path);
            assert!(
                module.is_ok(),
                "kernel '{file_path}' failed to compose: {:?}",
                module.err()
            );
        }
    }

    #[test]
    fn texture_output_kernels_lower_to_fragment() {
        use crate::gpu::convert;
        // Kernels with a storage-texture output must survive the
        // emulation lowering; buffer-output kernels must be refused.
        for (source, file_path) in all_kernel_sources() {
            let inlined = inline_imports(source);
            let converted = convert::compute_to_fragment(&inlined, "main");
            let expects_fragment =
                !matches!(file_path, "decode.wgsl" | "ransac.wgsl");
            if expects_fragment {
                let converted = converted.unwrap_or_else(|e| {
                    panic!("kernel '{file_path}' failed to lower: {e}")
                });
                let parsed = naga::front::wgsl::parse_str(&converted.source);
                assert!(parsed.is_ok(), "{file_path}: {:?}", parsed.err());
            } else {
                assert!(
                    converted.is_err(),
                    "buffer kernel '{file_path}' unexpectedly lowered"
                );
            }
        }
    }

    #[test]
    fn sampling_module_registers_and_composes() {
        let mut composer = ShaderComposer::new();
        let src = r"
#import argus::sampling::{luminance}

@group(0) @binding(0) var out_image: texture_storage_2d<r8unorm, write>;
@group(0) @binding(1) var src_tex: texture_2d<f32>;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let texel = textureLoad(src_tex, vec2<i32>(gid.xy), 0);
    textureStore(out_image, vec2<i32>(gid.xy), vec4<f32>(luminance(texel.rgb), 0.0, 0.0, 1.0));
}
";
        let module = composer.compose_naga(src, "test.wgsl");
        assert!(module.is_ok(), "{:?}", module.err());
    }

    #[test]
    fn inline_imports_splices_module_body() {
        let src = "#import argus::sampling::{luminance}\nfn f() {}\n";
        let inlined = inline_imports(src);
        assert!(!inlined.contains("#import"));
        assert!(!inlined.contains("#define_import_path"));
        assert!(inlined.contains("fn luminance"));
        assert!(inlined.contains("fn f()"));
    }

    #[test]
    fn inline_imports_is_identity_without_imports() {
        let src = "fn f() {}\n";
        assert_eq!(inline_imports(src), src);
    }
}
