//! Planar pose recovery.
//!
//! Marker pose comes from decomposing `K^-1 H` into rotation and
//! translation, where `H` maps marker-local coordinates (meters, z = 0)
//! to image pixels. EPnP constants are reserved in the options for a
//! later upgrade; the planar decomposition covers fiducials, which are
//! flat by construction.

use glam::{Mat3, Quat, Vec2, Vec3};

use crate::frame::Pose;
use crate::math::{CameraIntrinsics, Homography};

/// Marker-local corner positions for a square marker of the given edge
/// length, ordered TL, TR, BR, BL to match image corner ordering.
#[must_use]
pub fn marker_object_corners(size_m: f32) -> [Vec2; 4] {
    let h = size_m * 0.5;
    [
        Vec2::new(-h, -h),
        Vec2::new(h, -h),
        Vec2::new(h, h),
        Vec2::new(-h, h),
    ]
}

/// Recover the marker pose from its image corners.
///
/// Solves the homography from marker-local corners to pixels, lifts it
/// through the inverse intrinsics, and orthonormalizes the rotation
/// columns. Returns `None` when the homography is degenerate or the
/// decomposition collapses.
#[must_use]
pub fn estimate_marker_pose(
    image_corners: &[Vec2; 4],
    marker_size_m: f32,
    k: &CameraIntrinsics,
) -> Option<Pose> {
    let object = marker_object_corners(marker_size_m);
    let h = Homography::from_correspondences(&object, image_corners)?;

    // B = K^-1 H, column by column.
    let m = &h.0;
    let inv_fx = 1.0 / f64::from(k.fx);
    let inv_fy = 1.0 / f64::from(k.fy);
    let (cx, cy) = (f64::from(k.cx), f64::from(k.cy));

    let col = |c: usize| {
        Vec3::new(
            ((m[c] - cx * m[6 + c]) * inv_fx) as f32,
            ((m[3 + c] - cy * m[6 + c]) * inv_fy) as f32,
            m[6 + c] as f32,
        )
    };
    let b0 = col(0);
    let b1 = col(1);
    let b2 = col(2);

    let n0 = b0.length();
    let n1 = b1.length();
    if n0 < 1e-9 || n1 < 1e-9 {
        return None;
    }
    let scale = 2.0 / (n0 + n1);

    let mut r0 = b0 * scale;
    let mut r1 = b1 * scale;
    let mut t = b2 * scale;

    // The marker must sit in front of the camera.
    if t.z < 0.0 {
        r0 = -r0;
        r1 = -r1;
        t = -t;
    }

    // Orthonormalize: keep r0's direction, rebuild r1 in the plane.
    let r0 = r0.normalize();
    let r2 = r0.cross(r1).normalize();
    let r1 = r2.cross(r0);

    let rot = Mat3::from_cols(r0, r1, r2);
    let q = Quat::from_mat3(&rot).normalize();
    if !q.is_finite() {
        return None;
    }

    Some(Pose {
        position: t,
        rotation: q,
    })
}

/// Hemisphere-corrected spherical interpolation toward a new orientation.
///
/// `alpha` is the blend weight of the new measurement, matching the
/// confidence EMA constant.
#[must_use]
pub fn slerp_smooth(previous: Quat, current: Quat, alpha: f32) -> Quat {
    let current = if previous.dot(current) < 0.0 {
        -current
    } else {
        current
    };
    previous.slerp(current, alpha.clamp(0.0, 1.0)).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Project marker corners under a known pose to build a test image.
    fn project_corners(
        pose: &Pose,
        size_m: f32,
        k: &CameraIntrinsics,
    ) -> [Vec2; 4] {
        let object = marker_object_corners(size_m);
        let mut out = [Vec2::ZERO; 4];
        for (i, c) in object.iter().enumerate() {
            let p_cam = pose.rotation * Vec3::new(c.x, c.y, 0.0) + pose.position;
            let (pix, _) = k.project(p_cam).unwrap();
            out[i] = pix;
        }
        out
    }

    #[test]
    fn recovers_frontal_pose() {
        let k = CameraIntrinsics::from_resolution(1280, 720, 60.0);
        let truth = Pose {
            position: Vec3::new(0.0, 0.0, 1.0),
            rotation: Quat::IDENTITY,
        };
        let corners = project_corners(&truth, 0.1, &k);
        let est = estimate_marker_pose(&corners, 0.1, &k).unwrap();
        assert!((est.position - truth.position).length() < 0.01);
        assert!(est.rotation.angle_between(truth.rotation) < 0.02);
    }

    #[test]
    fn recovers_rotated_offset_pose() {
        let k = CameraIntrinsics::from_resolution(1280, 720, 60.0);
        let truth = Pose {
            position: Vec3::new(0.15, -0.08, 0.8),
            rotation: Quat::from_rotation_z(0.5) * Quat::from_rotation_x(0.3),
        };
        let corners = project_corners(&truth, 0.05, &k);
        let est = estimate_marker_pose(&corners, 0.05, &k).unwrap();
        assert!(
            (est.position - truth.position).length() < 0.02,
            "position {:?}",
            est.position
        );
        assert!(
            est.rotation.angle_between(truth.rotation) < 0.05,
            "angle {}",
            est.rotation.angle_between(truth.rotation)
        );
    }

    #[test]
    fn translation_is_in_front_of_camera() {
        let k = CameraIntrinsics::from_resolution(640, 480, 60.0);
        let truth = Pose {
            position: Vec3::new(0.0, 0.1, 1.5),
            rotation: Quat::from_rotation_y(0.4),
        };
        let corners = project_corners(&truth, 0.08, &k);
        let est = estimate_marker_pose(&corners, 0.08, &k).unwrap();
        assert!(est.position.z > 0.0);
    }

    #[test]
    fn slerp_takes_short_path() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_z(0.2);
        let mid = slerp_smooth(a, b, 0.5);
        assert!(mid.angle_between(a) < 0.11);
        // Negated target must give the same orientation.
        let mid_neg = slerp_smooth(a, -b, 0.5);
        assert!(mid.angle_between(mid_neg) < 1e-5);
    }
}
