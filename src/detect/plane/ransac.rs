//! CPU RANSAC plane fitting.
//!
//! The reference implementation of the RANSAC kernel, with the early
//! termination the GPU variant cannot express (all trials run in one
//! dispatch there). Used on the emulation backend and in tests.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

use crate::options::PlaneOptions;

/// One fitted plane hypothesis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneCandidate {
    /// Unit normal.
    pub normal: Vec3,
    /// Signed distance: `normal . x + d = 0`.
    pub d: f32,
    /// Inlier centroid.
    pub centroid: Vec3,
    /// Supporting inlier count.
    pub inliers: u32,
    /// `inliers x mean inlier fit`.
    pub score: f32,
}

/// Inliers / total ratio that stops trials early.
const EARLY_EXIT_RATIO: f32 = 0.8;

fn score_plane(
    normal: Vec3,
    d: f32,
    points: &[Vec3],
    normals: Option<&[Vec3]>,
    opts: &PlaneOptions,
) -> PlaneCandidate {
    let normal_cos_min = opts.normal_threshold_deg.to_radians().cos();
    let mut inliers = 0u32;
    let mut fit_sum = 0.0f32;
    let mut centroid = Vec3::ZERO;
    for (i, p) in points.iter().enumerate() {
        let dist = (normal.dot(*p) + d).abs();
        if dist >= opts.distance_threshold {
            continue;
        }
        if let Some(ns) = normals {
            if normal.dot(ns[i]).abs() <= normal_cos_min {
                continue;
            }
        }
        inliers += 1;
        fit_sum += 1.0 - dist / opts.distance_threshold;
        centroid += *p;
    }
    if inliers > 0 {
        centroid /= inliers as f32;
    }
    PlaneCandidate {
        normal,
        d,
        centroid,
        inliers,
        score: fit_sum, // inliers * mean fit == fit sum
    }
}

/// Run up to `opts.iterations` trials and return every non-degenerate
/// candidate, unsorted. Terminates early once a trial captures 80% of
/// the cloud.
#[must_use]
pub fn plane_candidates(
    points: &[Vec3],
    normals: Option<&[Vec3]>,
    opts: &PlaneOptions,
    seed: u64,
) -> Vec<PlaneCandidate> {
    if points.len() < 3 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    for _ in 0..opts.iterations {
        let i0 = rng.random_range(0..points.len());
        let mut i1 = rng.random_range(0..points.len());
        let mut i2 = rng.random_range(0..points.len());
        if i1 == i0 {
            i1 = (i1 + 1) % points.len();
        }
        if i2 == i0 || i2 == i1 {
            i2 = (i2 + 2) % points.len();
        }

        let cross = (points[i1] - points[i0]).cross(points[i2] - points[i0]);
        let len = cross.length();
        if len < 1e-8 {
            continue;
        }
        let normal = cross / len;
        let d = -normal.dot(points[i0]);
        let candidate = score_plane(normal, d, points, normals, opts);
        let ratio = candidate.inliers as f32 / points.len() as f32;
        out.push(candidate);
        if ratio >= EARLY_EXIT_RATIO {
            break;
        }
    }
    out
}

/// Sort by score, drop near-duplicates (normal cosine above 0.95 and
/// offset within 0.1 m of an accepted plane), enforce the inlier floor,
/// and keep at most `opts.max_planes`.
#[must_use]
pub fn select_planes(
    mut candidates: Vec<PlaneCandidate>,
    opts: &PlaneOptions,
) -> Vec<PlaneCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut accepted: Vec<PlaneCandidate> = Vec::new();
    for c in candidates {
        if c.inliers < opts.min_inliers {
            continue;
        }
        let duplicate = accepted.iter().any(|a| {
            a.normal.dot(c.normal).abs() > 0.95 && (a.d - c.d).abs() < 0.1
        });
        if !duplicate {
            accepted.push(c);
            if accepted.len() >= opts.max_planes {
                break;
            }
        }
    }
    accepted
}

/// Points within the distance threshold of a plane.
#[must_use]
pub fn inlier_points(
    points: &[Vec3],
    candidate: &PlaneCandidate,
    distance_threshold: f32,
) -> Vec<Vec3> {
    points
        .iter()
        .copied()
        .filter(|p| (candidate.normal.dot(*p) + candidate.d).abs() < distance_threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points on y = 0 with Gaussian-ish noise plus uniform outliers.
    pub(crate) fn noisy_floor(
        count: usize,
        noise: f32,
        outlier_ratio: f32,
        seed: u64,
    ) -> Vec<Vec3> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points = Vec::with_capacity(count);
        for i in 0..count {
            let x = rng.random_range(-2.0..2.0);
            let z = rng.random_range(-2.0..2.0);
            if (i as f32) < count as f32 * outlier_ratio {
                points.push(Vec3::new(x, rng.random_range(-2.0..2.0), z));
            } else {
                // Sum of three uniforms approximates the Gaussian spread.
                let n: f32 = (0..3)
                    .map(|_| rng.random_range(-noise..noise))
                    .sum::<f32>()
                    / 3.0;
                points.push(Vec3::new(x, n, z));
            }
        }
        points
    }

    #[test]
    fn recovers_a_noisy_floor_plane() {
        let points = noisy_floor(5000, 0.01, 0.1, 42);
        let opts = PlaneOptions::default();
        let candidates = plane_candidates(&points, None, &opts, 7);
        let selected = select_planes(candidates, &opts);
        assert_eq!(selected.len(), 1, "expected exactly one plane");
        let plane = &selected[0];
        let n = if plane.normal.y < 0.0 {
            -plane.normal
        } else {
            plane.normal
        };
        assert!(
            (n - Vec3::Y).length() < 0.01,
            "normal {n:?} deviates more than 1 degree"
        );
        assert!(plane.d.abs() < 0.02, "offset {}", plane.d);
    }

    #[test]
    fn normal_gate_rejects_misaligned_points() {
        let points = noisy_floor(500, 0.001, 0.0, 3);
        // Every supplied normal points along x, far from the plane
        // normal, so no inliers survive the gate.
        let normals = vec![Vec3::X; points.len()];
        let opts = PlaneOptions::default();
        let candidates = plane_candidates(&points, Some(&normals), &opts, 3);
        assert!(candidates.iter().all(|c| c.inliers == 0));
    }

    #[test]
    fn deduplication_keeps_distinct_planes_only() {
        let make = |normal: Vec3, d: f32, score: f32| PlaneCandidate {
            normal,
            d,
            centroid: Vec3::ZERO,
            inliers: 500,
            score,
        };
        let opts = PlaneOptions::default();
        let selected = select_planes(
            vec![
                make(Vec3::Y, 0.0, 100.0),
                make(Vec3::Y, 0.05, 90.0), // duplicate of the first
                make(Vec3::X, 0.0, 80.0),
                make(-Vec3::Y, -0.02, 70.0), // sign-flipped duplicate
            ],
            &opts,
        );
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn too_few_points_yield_nothing() {
        let opts = PlaneOptions::default();
        assert!(plane_candidates(&[Vec3::ZERO, Vec3::X], None, &opts, 1)
            .is_empty());
    }

    #[test]
    fn min_inlier_floor_applies() {
        let mut opts = PlaneOptions::default();
        opts.min_inliers = 100;
        let candidate = PlaneCandidate {
            normal: Vec3::Y,
            d: 0.0,
            centroid: Vec3::ZERO,
            inliers: 99,
            score: 50.0,
        };
        assert!(select_planes(vec![candidate], &opts).is_empty());
    }
}
