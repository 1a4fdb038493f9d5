//! Lowering of canonical compute kernels to fragment programs.
//!
//! The emulation backend runs each kernel as a full-screen pass: the
//! kernel's output storage texture becomes the color attachment, and the
//! global invocation id is derived from the fragment position. Kernels
//! must follow the crate's canonical form for this to work:
//!
//! - `@group(0) @binding(0)` is the single write-only
//!   `texture_storage_2d` output,
//! - remaining bindings are sampled textures, samplers, or uniforms
//!   (storage buffers cannot be expressed in the fragment dialect),
//! - the entry point takes `@builtin(global_invocation_id)` and ends with
//!   exactly one `textureStore` into the output.
//!
//! Kernels outside this form (cross-workgroup atomics, storage-buffer
//! writes) are rejected; their callers fall back to CPU implementations.

use crate::error::{ArError, ErrorCode};

/// Fragment entry point emitted by the converter.
pub const FRAGMENT_ENTRY: &str = "fs_main";
/// Vertex entry point emitted by the converter.
pub const VERTEX_ENTRY: &str = "vs_fullscreen";

/// Result of a successful lowering.
#[derive(Debug)]
pub struct ConvertedKernel {
    /// The fragment-dialect WGSL source.
    pub source: String,
    /// Color target format matching the original storage texture.
    pub target_format: wgpu::TextureFormat,
}

fn compile_err(reason: &str, detail: impl Into<String>) -> ArError {
    ArError::new(ErrorCode::ShaderCompile, detail.into())
        .with_context("reason", reason)
}

/// Parse `@workgroup_size(x, y, z)` from a kernel source. Missing
/// dimensions default to 1.
#[must_use]
pub fn parse_workgroup_size(source: &str) -> Option<(u32, u32, u32)> {
    let start = source.find("@workgroup_size(")? + "@workgroup_size(".len();
    let end = source[start..].find(')')? + start;
    let parsed: Vec<u32> = source[start..end]
        .split(',')
        .map(|p| p.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parsed.as_slice() {
        [x] => Some((*x, 1, 1)),
        [x, y] => Some((*x, *y, 1)),
        [x, y, z] => Some((*x, *y, *z)),
        _ => None,
    }
}

/// Count `@binding(...)` declarations in a kernel source.
#[must_use]
pub fn count_bindings(source: &str) -> usize {
    source.matches("@binding(").count()
}

fn storage_format(name: &str) -> Option<(wgpu::TextureFormat, &'static str)> {
    match name {
        "r8unorm" => Some((wgpu::TextureFormat::R8Unorm, "f32")),
        "rgba8unorm" => Some((wgpu::TextureFormat::Rgba8Unorm, "f32")),
        "r32float" => Some((wgpu::TextureFormat::R32Float, "f32")),
        "rgba32float" => Some((wgpu::TextureFormat::Rgba32Float, "f32")),
        "r32uint" => Some((wgpu::TextureFormat::R32Uint, "u32")),
        _ => None,
    }
}

/// Find the index of the matching close delimiter for the open delimiter
/// at `open`. Returns `None` on imbalance.
fn matching(source: &str, open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let bytes = source.as_bytes();
    debug_assert_eq!(bytes[open], open_ch);
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if b == open_ch {
            depth += 1;
        } else if b == close_ch {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Split a delimited argument list on top-level commas.
fn split_args(args: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, b) in args.bytes().enumerate() {
        match b {
            b'(' | b'<' | b'[' => depth += 1,
            b')' | b'>' | b']' => depth -= 1,
            b',' if depth == 0 => {
                out.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(args[start..].trim());
    out
}

struct StorageDecl {
    var_name: String,
    format: wgpu::TextureFormat,
    scalar: &'static str,
    /// Byte range of the whole declaration statement.
    range: (usize, usize),
}

fn find_storage_output(source: &str) -> Result<StorageDecl, ArError> {
    let pos = source.find("texture_storage_2d<").ok_or_else(|| {
        compile_err("no-output", "kernel declares no storage texture output")
    })?;
    // Statement spans from the preceding '@group' to the closing ';'.
    let start = source[..pos].rfind("@group").ok_or_else(|| {
        compile_err("no-output", "storage texture lacks @group attribute")
    })?;
    let end = source[pos..]
        .find(';')
        .map(|i| pos + i + 1)
        .ok_or_else(|| compile_err("no-output", "unterminated declaration"))?;
    let stmt = &source[start..end];

    let var_name = stmt
        .split("var ")
        .nth(1)
        .and_then(|rest| rest.split(':').next())
        .map(str::trim)
        .ok_or_else(|| compile_err("no-output", "malformed storage declaration"))?;

    let fmt_start = stmt.find('<').map(|i| i + 1).unwrap_or(0);
    let fmt_name = stmt[fmt_start..]
        .split([',', '>'])
        .next()
        .map(str::trim)
        .unwrap_or("");
    let (format, scalar) = storage_format(fmt_name).ok_or_else(|| {
        compile_err(
            "format",
            format!("unsupported storage texture format '{fmt_name}'"),
        )
    })?;

    Ok(StorageDecl {
        var_name: var_name.to_owned(),
        format,
        scalar,
        range: (start, end),
    })
}

/// Lower a canonical compute kernel to the fragment dialect.
///
/// # Errors
///
/// Returns [`ArError`] with code `ShaderCompile` when the kernel falls
/// outside the canonical form; the `reason` context entry names why.
pub fn compute_to_fragment(
    source: &str,
    entry: &str,
) -> Result<ConvertedKernel, ArError> {
    if source.contains("var<storage") {
        return Err(compile_err(
            "storage-buffer",
            "kernel uses storage buffers; the emulation backend cannot \
             lower it, fall back to CPU",
        ));
    }
    if source.contains("atomic<") || source.contains("workgroupBarrier") {
        return Err(compile_err(
            "atomics",
            "kernel needs cross-workgroup coordination; fall back to CPU",
        ));
    }

    let storage = find_storage_output(source)?;

    // Locate the compute entry function and its body.
    let fn_marker = format!("fn {entry}(");
    let fn_pos = source.find(&fn_marker).ok_or_else(|| {
        compile_err("entry", format!("entry point '{entry}' not found"))
    })?;
    let sig_open = fn_pos + fn_marker.len() - 1;
    let sig_close = matching(source, sig_open, b'(', b')')
        .ok_or_else(|| compile_err("entry", "unbalanced signature"))?;
    let params = &source[sig_open + 1..sig_close];
    let gid_name = params
        .split("@builtin(global_invocation_id)")
        .nth(1)
        .and_then(|rest| rest.split(':').next())
        .map(str::trim)
        .ok_or_else(|| {
            compile_err("entry", "entry lacks @builtin(global_invocation_id)")
        })?;

    let body_open = source[sig_close..]
        .find('{')
        .map(|i| sig_close + i)
        .ok_or_else(|| compile_err("entry", "missing body"))?;
    let body_close = matching(source, body_open, b'{', b'}')
        .ok_or_else(|| compile_err("entry", "unbalanced body"))?;
    let body = &source[body_open + 1..body_close];

    // The `@compute` attribute block starts at the preceding attribute.
    let attr_start = source[..fn_pos].rfind("@compute").ok_or_else(|| {
        compile_err("entry", "entry point is not a compute shader")
    })?;

    // Exactly one textureStore into the output, as the final statement.
    let store_count = body.matches("textureStore(").count();
    if store_count != 1 {
        return Err(compile_err(
            "stores",
            format!("expected exactly one textureStore, found {store_count}"),
        ));
    }
    let store_pos = body.find("textureStore(").unwrap_or(0);
    let store_open = store_pos + "textureStore".len();
    let store_close = matching(body, store_open, b'(', b')')
        .ok_or_else(|| compile_err("stores", "unbalanced textureStore"))?;
    let args = split_args(&body[store_open + 1..store_close]);
    if args.len() != 3 || args[0] != storage.var_name {
        return Err(compile_err(
            "stores",
            "textureStore must target the declared output texture",
        ));
    }
    let value_expr = args[2];
    let stmt_end = body[store_close..]
        .find(';')
        .map(|i| store_close + i + 1)
        .unwrap_or(body.len());

    let zero = match storage.scalar {
        "u32" => "vec4<u32>(0u)",
        _ => "vec4<f32>(0.0)",
    };
    let out_ty = match storage.scalar {
        "u32" => "vec4<u32>",
        _ => "vec4<f32>",
    };

    let mut frag_body = String::new();
    frag_body.push_str(&body[..store_pos]);
    frag_body.push_str(&format!("return {value_expr};"));
    frag_body.push_str(&body[stmt_end..]);
    // Early exits in the compute form become zero writes.
    let frag_body = frag_body.replace("return;", &format!("return {zero};"));

    // Prelude: the source minus the storage declaration and the compute
    // entry block, preserving helper functions and other bindings.
    let mut prelude = String::new();
    let mut cuts = [(storage.range.0, storage.range.1), (attr_start, body_close + 1)];
    cuts.sort_unstable();
    let mut cursor = 0usize;
    for (s, e) in cuts {
        prelude.push_str(&source[cursor..s]);
        cursor = e;
    }
    prelude.push_str(&source[cursor..]);

    let converted = format!(
        "{prelude}\n\
         @vertex\n\
         fn {VERTEX_ENTRY}(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {{\n\
         \x20   let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));\n\
         \x20   return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);\n\
         }}\n\n\
         @fragment\n\
         fn {FRAGMENT_ENTRY}(@builtin(position) frag_pos: vec4<f32>) -> @location(0) {out_ty} {{\n\
         \x20   let {gid_name} = vec3<u32>(u32(frag_pos.x), u32(frag_pos.y), 0u);\n\
         {frag_body}\n\
         }}\n"
    );

    Ok(ConvertedKernel {
        source: converted,
        target_format: storage.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
@group(0) @binding(0) var out_image: texture_storage_2d<r8unorm, write>;
@group(0) @binding(1) var src: texture_2d<f32>;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(src);
    if (gid.x >= dims.x || gid.y >= dims.y) {
        return;
    }
    let texel = textureLoad(src, vec2<i32>(gid.xy), 0);
    let luma = dot(texel.rgb, vec3<f32>(0.299, 0.587, 0.114));
    textureStore(out_image, vec2<i32>(gid.xy), vec4<f32>(luma, 0.0, 0.0, 1.0));
}
";

    #[test]
    fn converts_canonical_kernel() {
        let converted = compute_to_fragment(SAMPLE, "main").unwrap();
        assert_eq!(converted.target_format, wgpu::TextureFormat::R8Unorm);
        assert!(converted.source.contains("fn fs_main"));
        assert!(converted.source.contains("fn vs_fullscreen"));
        assert!(!converted.source.contains("textureStore"));
        assert!(!converted.source.contains("@compute"));
        // Early return became a zero write.
        assert!(converted.source.contains("return vec4<f32>(0.0);"));
        // The stored value became the fragment return.
        assert!(converted
            .source
            .contains("return vec4<f32>(luma, 0.0, 0.0, 1.0);"));
    }

    #[test]
    fn converted_source_parses_as_wgsl() {
        let converted = compute_to_fragment(SAMPLE, "main").unwrap();
        let parsed = naga::front::wgsl::parse_str(&converted.source);
        assert!(parsed.is_ok(), "{:?}", parsed.err());
    }

    #[test]
    fn rejects_storage_buffer_kernels() {
        let src = r"
@group(0) @binding(0) var out_image: texture_storage_2d<r32float, write>;
@group(0) @binding(1) var<storage, read> points: array<vec4<f32>>;
@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    textureStore(out_image, vec2<i32>(gid.xy), vec4<f32>(0.0));
}
";
        let err = compute_to_fragment(src, "main").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ShaderCompile);
        assert_eq!(
            err.context().get("reason").map(String::as_str),
            Some("storage-buffer")
        );
    }

    #[test]
    fn rejects_multiple_stores() {
        let src = SAMPLE.replace(
            "textureStore(out_image, vec2<i32>(gid.xy), vec4<f32>(luma, 0.0, 0.0, 1.0));",
            "textureStore(out_image, vec2<i32>(gid.xy), vec4<f32>(luma, 0.0, 0.0, 1.0));\n    textureStore(out_image, vec2<i32>(gid.xy), vec4<f32>(0.0));",
        );
        assert!(compute_to_fragment(&src, "main").is_err());
    }

    #[test]
    fn uint_output_uses_uint_fragment_type() {
        let src = r"
@group(0) @binding(0) var out_ids: texture_storage_2d<r32uint, write>;
@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    textureStore(out_ids, vec2<i32>(gid.xy), vec4<u32>(gid.x));
}
";
        let converted = compute_to_fragment(src, "main").unwrap();
        assert_eq!(converted.target_format, wgpu::TextureFormat::R32Uint);
        assert!(converted.source.contains("-> @location(0) vec4<u32>"));
        let parsed = naga::front::wgsl::parse_str(&converted.source);
        assert!(parsed.is_ok(), "{:?}", parsed.err());
    }

    #[test]
    fn workgroup_size_parses() {
        assert_eq!(parse_workgroup_size(SAMPLE), Some((8, 8, 1)));
        assert_eq!(
            parse_workgroup_size("@compute @workgroup_size(64)\nfn main() {}"),
            Some((64, 1, 1))
        );
        assert_eq!(parse_workgroup_size("fn main() {}"), None);
    }

    #[test]
    fn binding_count_counts_declarations() {
        assert_eq!(count_bindings(SAMPLE), 2);
    }
}
