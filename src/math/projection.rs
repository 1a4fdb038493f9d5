//! Pinhole camera intrinsics.
//!
//! Until a calibration is supplied, intrinsics are assumed from the
//! negotiated resolution and a horizontal field of view (60 degrees by
//! default), matching how consumer AR sessions bootstrap before
//! calibration data arrives.

use glam::{Vec2, Vec3};

/// Default assumed horizontal field of view in degrees.
pub const DEFAULT_HFOV_DEG: f32 = 60.0;

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Horizontal focal length.
    pub fx: f32,
    /// Vertical focal length.
    pub fy: f32,
    /// Principal point x.
    pub cx: f32,
    /// Principal point y.
    pub cy: f32,
}

impl CameraIntrinsics {
    /// Intrinsics assumed from a resolution and horizontal FOV.
    ///
    /// The focal length follows from `fx = (w/2) / tan(hfov/2)`; square
    /// pixels are assumed (`fy = fx`) and the principal point sits at the
    /// image center.
    #[must_use]
    pub fn from_resolution(width: u32, height: u32, hfov_deg: f32) -> Self {
        let half_fov = (hfov_deg.max(1.0)).to_radians() * 0.5;
        let fx = (width as f32 * 0.5) / half_fov.tan();
        Self {
            fx,
            fy: fx,
            cx: width as f32 * 0.5,
            cy: height as f32 * 0.5,
        }
    }

    /// Intrinsics from explicit calibration values.
    ///
    /// `fx` and `fy` must be positive.
    #[must_use]
    pub fn from_calibration(fx: f32, fy: f32, cx: f32, cy: f32) -> Option<Self> {
        if fx <= 0.0 || fy <= 0.0 {
            return None;
        }
        Some(Self { fx, fy, cx, cy })
    }

    /// Project a camera-space point (z forward, in meters) to pixel
    /// coordinates plus depth. Points at or behind the camera return `None`.
    #[must_use]
    pub fn project(&self, p: Vec3) -> Option<(Vec2, f32)> {
        if p.z <= 0.0 {
            return None;
        }
        let x = self.fx * p.x / p.z + self.cx;
        let y = self.fy * p.y / p.z + self.cy;
        Some((Vec2::new(x, y), p.z))
    }

    /// Unproject a pixel coordinate at the given depth back into camera
    /// space.
    #[must_use]
    pub fn unproject(&self, pixel: Vec2, depth: f32) -> Vec3 {
        Vec3::new(
            (pixel.x - self.cx) * depth / self.fx,
            (pixel.y - self.cy) * depth / self.fy,
            depth,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fov_centers_principal_point() {
        let k = CameraIntrinsics::from_resolution(1280, 720, DEFAULT_HFOV_DEG);
        assert_eq!(k.cx, 640.0);
        assert_eq!(k.cy, 360.0);
        assert!(k.fx > 0.0 && k.fy > 0.0);
        // 60 degree hfov: fx = 640 / tan(30 deg)
        assert!((k.fx - 640.0 / 30.0f32.to_radians().tan()).abs() < 1e-2);
    }

    #[test]
    fn unproject_then_project_round_trips() {
        let k = CameraIntrinsics::from_resolution(640, 480, DEFAULT_HFOV_DEG);
        for &(x, y, d) in &[
            (320.0, 240.0, 1.0),
            (10.0, 470.0, 0.25),
            (631.5, 2.25, 7.5),
        ] {
            let p = k.unproject(Vec2::new(x, y), d);
            let (pix, depth) = k.project(p).unwrap();
            assert!((pix.x - x).abs() < 1e-3, "x: {} vs {x}", pix.x);
            assert!((pix.y - y).abs() < 1e-3, "y: {} vs {y}", pix.y);
            assert!((depth - d).abs() < 1e-3);
        }
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let k = CameraIntrinsics::from_resolution(640, 480, DEFAULT_HFOV_DEG);
        assert!(k.project(Vec3::new(0.0, 0.0, -1.0)).is_none());
        assert!(k.project(Vec3::new(0.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn rejects_non_positive_focal_length() {
        assert!(CameraIntrinsics::from_calibration(0.0, 1.0, 0.0, 0.0).is_none());
        assert!(CameraIntrinsics::from_calibration(500.0, 500.0, 320.0, 240.0).is_some());
    }
}
