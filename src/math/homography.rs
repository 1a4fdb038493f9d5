//! The 3x3 projective transform between planar quadrilaterals.
//!
//! Solved from four point correspondences via an 8-row linear system
//! (Gauss-Jordan, `h22` fixed to 1), inverted through the adjugate, and
//! applied with a perspective divide. The marker detector maps candidate
//! quads onto the canonical decode square with this type; the pose solver
//! decomposes it against the camera intrinsics.

use glam::Vec2;

use super::linalg;

/// Row-major 3x3 homography, `h[8]` normalized to 1 when solvable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub [f64; 9]);

impl Homography {
    /// The identity transform.
    pub const IDENTITY: Self = Self([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

    /// Solve the homography mapping each `src[i]` to `dst[i]`.
    ///
    /// Builds the standard 8x8 system in the unknowns `h00..h21` with
    /// `h22 = 1`. Returns `None` for degenerate correspondences (three
    /// collinear points, repeated points).
    #[must_use]
    pub fn from_correspondences(src: &[Vec2; 4], dst: &[Vec2; 4]) -> Option<Self> {
        let mut a = [0.0f64; 64];
        let mut b = [0.0f64; 8];

        for i in 0..4 {
            let (x, y) = (f64::from(src[i].x), f64::from(src[i].y));
            let (u, v) = (f64::from(dst[i].x), f64::from(dst[i].y));

            let r0 = 2 * i;
            let r1 = 2 * i + 1;

            a[r0 * 8] = x;
            a[r0 * 8 + 1] = y;
            a[r0 * 8 + 2] = 1.0;
            a[r0 * 8 + 6] = -u * x;
            a[r0 * 8 + 7] = -u * y;
            b[r0] = u;

            a[r1 * 8 + 3] = x;
            a[r1 * 8 + 4] = y;
            a[r1 * 8 + 5] = 1.0;
            a[r1 * 8 + 6] = -v * x;
            a[r1 * 8 + 7] = -v * y;
            b[r1] = v;
        }

        linalg::solve(&mut a, &mut b, 8)?;

        Some(Self([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], 1.0,
        ]))
    }

    /// Apply the transform to a point (perspective divide included).
    ///
    /// Returns `None` when the point maps to the line at infinity.
    #[must_use]
    pub fn apply(&self, p: Vec2) -> Option<Vec2> {
        let h = &self.0;
        let (x, y) = (f64::from(p.x), f64::from(p.y));
        let w = h[6] * x + h[7] * y + h[8];
        if w.abs() < 1e-12 {
            return None;
        }
        let u = (h[0] * x + h[1] * y + h[2]) / w;
        let v = (h[3] * x + h[4] * y + h[5]) / w;
        Some(Vec2::new(u as f32, v as f32))
    }

    /// Invert via the adjugate. Returns `None` when the determinant is
    /// numerically zero.
    #[must_use]
    pub fn invert(&self) -> Option<Self> {
        let h = &self.0;
        let det = h[0] * (h[4] * h[8] - h[5] * h[7])
            - h[1] * (h[3] * h[8] - h[5] * h[6])
            + h[2] * (h[3] * h[7] - h[4] * h[6]);
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(Self([
            (h[4] * h[8] - h[5] * h[7]) * inv_det,
            (h[2] * h[7] - h[1] * h[8]) * inv_det,
            (h[1] * h[5] - h[2] * h[4]) * inv_det,
            (h[5] * h[6] - h[3] * h[8]) * inv_det,
            (h[0] * h[8] - h[2] * h[6]) * inv_det,
            (h[2] * h[3] - h[0] * h[5]) * inv_det,
            (h[3] * h[7] - h[4] * h[6]) * inv_det,
            (h[1] * h[6] - h[0] * h[7]) * inv_det,
            (h[0] * h[4] - h[1] * h[3]) * inv_det,
        ]))
    }

    /// Matrix product `self * other`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        let a = &self.0;
        let b = &other.0;
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 3 + c] = a[r * 3] * b[c]
                    + a[r * 3 + 1] * b[3 + c]
                    + a[r * 3 + 2] * b[6 + c];
            }
        }
        Self(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> [Vec2; 4] {
        [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ]
    }

    #[test]
    fn maps_correspondences_exactly() {
        let src = unit_square();
        let dst = [
            Vec2::new(400.0, 200.0),
            Vec2::new(880.0, 210.0),
            Vec2::new(870.0, 520.0),
            Vec2::new(410.0, 510.0),
        ];
        let h = Homography::from_correspondences(&src, &dst).unwrap();
        for i in 0..4 {
            let p = h.apply(src[i]).unwrap();
            assert!((p - dst[i]).length() < 1e-3, "corner {i}: {p:?}");
        }
    }

    #[test]
    fn inverse_composes_to_identity() {
        let src = unit_square();
        let dst = [
            Vec2::new(3.0, 1.0),
            Vec2::new(9.0, 2.0),
            Vec2::new(8.0, 7.0),
            Vec2::new(2.0, 6.0),
        ];
        let h = Homography::from_correspondences(&src, &dst).unwrap();
        let inv = h.invert().unwrap();
        let ident = h.compose(&inv);
        // Normalize by the bottom-right entry before comparing.
        let s = ident.0[8];
        for (i, v) in ident.0.iter().enumerate() {
            let expected = if i % 4 == 0 { 1.0 } else { 0.0 };
            assert!(
                (v / s - expected).abs() < 1e-5,
                "entry {i} was {}",
                v / s
            );
        }
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let src = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(3.0, 3.0),
        ];
        let dst = unit_square();
        assert!(Homography::from_correspondences(&src, &dst).is_none());
    }

    #[test]
    fn round_trips_interior_points() {
        let src = unit_square();
        let dst = [
            Vec2::new(100.0, 50.0),
            Vec2::new(300.0, 60.0),
            Vec2::new(280.0, 260.0),
            Vec2::new(110.0, 240.0),
        ];
        let h = Homography::from_correspondences(&src, &dst).unwrap();
        let inv = h.invert().unwrap();
        let p = Vec2::new(0.3, 0.7);
        let q = inv.apply(h.apply(p).unwrap()).unwrap();
        assert!((q - p).length() < 1e-4);
    }
}
