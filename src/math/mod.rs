//! Shared numeric routines for the perception pipeline.
//!
//! The vector/quaternion/matrix substrate is `glam`; this module adds the
//! small dense solvers the detectors and trackers need on top of it:
//! Gauss-Jordan elimination, the planar homography, and the pinhole
//! projection model.

/// Planar homography solve, inversion, and application.
pub mod homography;
/// Small dense linear algebra (Gauss-Jordan with partial pivoting).
pub mod linalg;
/// Pinhole intrinsics with project/unproject.
pub mod projection;

pub use homography::Homography;
pub use projection::CameraIntrinsics;
