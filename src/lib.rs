// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
// Vision math: intentional lossy casts and float comparisons throughout
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::float_cmp)]

//! Real-time augmented-reality perception pipeline built on wgpu.
//!
//! Given a live camera stream, argus produces per-frame tracking output:
//! fiducial (ArUco) markers with 6-DOF pose, detected and tracked planes
//! with oriented boundaries, optionally a sparse set of tracked feature
//! points, and an ambient light estimate. Downstream 3-D engines anchor
//! virtual content on these records; rendering, mapping, and transport
//! are out of scope.
//!
//! # Key entry points
//!
//! - [`engine::Engine`] - the pipeline orchestrator and public API
//! - [`options::EngineOptions`] - configuration, presets, TOML support
//! - [`frame::ArFrame`] - the per-frame output record
//! - [`events`] - the typed event bus
//!
//! # Architecture
//!
//! A single driver thread paces the per-frame loop: acquire a camera
//! frame, run the GPU preprocessing kernels (grayscale, blur, adaptive
//! threshold), record each detector plugin's GPU stages, submit once,
//! and collect results. Detector CPU stages (contour tracing, decode,
//! RANSAC selection, descriptor matching) run on per-plugin background
//! workers with at-most-one job in flight, delivering through lock-free
//! triple buffers; frames export the latest *completed* detection, one
//! frame behind the camera, flagged `stale` while a newer job runs.
//!
//! The GPU layer is backend-agnostic: kernels are written once as WGSL
//! compute and run either natively or lowered to full-screen raster
//! passes on downlevel adapters (see [`gpu::backend`] and
//! [`gpu::convert`]).

/// Video frame acquisition (live capture and synthetic sources).
pub mod camera;
/// Detector plugins: markers, features, planes, light.
pub mod detect;
/// The pipeline orchestrator.
pub mod engine;
/// Structured errors with codes, context, and suggestions.
pub mod error;
/// The typed event bus.
pub mod events;
/// Per-frame output records.
pub mod frame;
/// GPU abstraction: context, kernel backends, tracker, readback.
pub mod gpu;
/// Shared numeric routines (homography, Gauss-Jordan, projection).
pub mod math;
/// Configuration, presets, and TOML support.
pub mod options;
/// GPU preprocessing and its CPU reference implementations.
pub mod preprocess;
/// Temporal tracking: state machines, Kalman filter, pose recovery.
pub mod track;
/// Frame timing and clock utilities.
pub mod util;

pub use engine::Engine;
pub use error::{ArError, ErrorCode};
pub use frame::ArFrame;
pub use options::{EngineOptions, Preset};
