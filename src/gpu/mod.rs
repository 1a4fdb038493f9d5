//! GPU abstraction for the perception pipeline.
//!
//! Provides headless wgpu device initialization, the kernel backend
//! contract with its two implementations (native compute and raster
//! emulation), the process-wide resource tracker, pooled readback
//! buffers, and WGSL composition.

/// Kernel backend contract and its two implementations.
pub mod backend;
/// Compute-to-fragment WGSL lowering for the emulation backend.
pub mod convert;
/// Headless wgpu device, queue, and capability probing.
pub mod context;
/// Pooled, double-buffered readback staging buffers.
pub mod readback;
/// Tracked texture and buffer wrappers.
pub mod resources;
/// WGSL shader composition with `#import` support via naga-oil.
pub mod shader_composer;
/// Process-wide resource registry with leak detection.
pub mod tracker;
