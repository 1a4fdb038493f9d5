//! Plane boundary polygons.
//!
//! Inliers are projected onto a deterministic in-plane basis, hulled
//! with Andrew's monotone chain, simplified with a coarse tolerance, and
//! lifted back to 3-D. A small cache keyed by the quantized plane
//! equation reuses fresh polygons across frames.

use glam::{Vec2, Vec3};
use rustc_hash::FxHashMap;

/// Simplification tolerance in meters.
pub const SIMPLIFY_TOLERANCE_M: f32 = 0.1;

/// Deterministic orthonormal basis `(u, v)` perpendicular to `n`.
///
/// `u` is built against the world axis least aligned with `n`, so the
/// same plane always yields the same parameterization.
#[must_use]
pub fn plane_basis(n: Vec3) -> (Vec3, Vec3) {
    let reference = if n.x.abs() <= n.y.abs() && n.x.abs() <= n.z.abs() {
        Vec3::X
    } else if n.y.abs() <= n.z.abs() {
        Vec3::Y
    } else {
        Vec3::Z
    };
    let u = n.cross(reference).normalize();
    let v = n.cross(u);
    (u, v)
}

/// Convex hull of 2-D points (Andrew's monotone chain), counterclockwise
/// without a repeated first point.
#[must_use]
pub fn convex_hull(points: &[Vec2]) -> Vec<Vec2> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut sorted: Vec<Vec2> = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup_by(|a, b| (*a - *b).length_squared() < 1e-12);
    if sorted.len() < 3 {
        return sorted;
    }

    let cross =
        |o: Vec2, a: Vec2, b: Vec2| (a - o).perp_dot(b - o);

    let mut lower: Vec<Vec2> = Vec::new();
    for &p in &sorted {
        while lower.len() >= 2
            && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0
        {
            let _ = lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Vec2> = Vec::new();
    for &p in sorted.iter().rev() {
        while upper.len() >= 2
            && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0
        {
            let _ = upper.pop();
        }
        upper.push(p);
    }
    let _ = lower.pop();
    let _ = upper.pop();
    lower.extend(upper);
    lower
}

/// Area of a simple polygon (shoelace, non-negative).
#[must_use]
pub fn polygon_area(polygon: &[Vec2]) -> f32 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        acc += a.x * b.y - b.x * a.y;
    }
    acc.abs() * 0.5
}

/// Drop hull vertices closer than `tolerance` to the segment joining
/// their neighbors (a single Douglas-Peucker sweep is enough for a
/// convex polygon).
#[must_use]
pub fn simplify(polygon: &[Vec2], tolerance: f32) -> Vec<Vec2> {
    if polygon.len() <= 3 {
        return polygon.to_vec();
    }
    let mut kept = Vec::with_capacity(polygon.len());
    let n = polygon.len();
    for i in 0..n {
        let prev = polygon[(i + n - 1) % n];
        let next = polygon[(i + 1) % n];
        let p = polygon[i];
        let seg = next - prev;
        let deviation = if seg.length_squared() < 1e-12 {
            (p - prev).length()
        } else {
            seg.perp_dot(p - prev).abs() / seg.length()
        };
        if deviation > tolerance {
            kept.push(p);
        }
    }
    if kept.len() < 3 {
        polygon.to_vec()
    } else {
        kept
    }
}

/// Result of boundary extraction for one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    /// The 3-D boundary polygon.
    pub polygon: Vec<Vec3>,
    /// Enclosed area in square meters.
    pub area: f32,
}

/// Project inliers onto the plane, hull, simplify, and lift back.
#[must_use]
pub fn compute_boundary(inliers: &[Vec3], normal: Vec3, d: f32) -> Boundary {
    if inliers.len() < 3 {
        return Boundary {
            polygon: Vec::new(),
            area: 0.0,
        };
    }
    let origin = -d * normal;
    let (u, v) = plane_basis(normal);
    let projected: Vec<Vec2> = inliers
        .iter()
        .map(|p| {
            let rel = *p - origin;
            Vec2::new(rel.dot(u), rel.dot(v))
        })
        .collect();
    let hull = convex_hull(&projected);
    let area = polygon_area(&hull);
    let simplified = simplify(&hull, SIMPLIFY_TOLERANCE_M);
    let polygon = simplified
        .iter()
        .map(|p| origin + u * p.x + v * p.y)
        .collect();
    Boundary { polygon, area }
}

/// Quantized cache key for a plane equation.
fn cache_key(normal: Vec3, d: f32) -> (i32, i32, i32, i32) {
    (
        (normal.x * 50.0).round() as i32,
        (normal.y * 50.0).round() as i32,
        (normal.z * 50.0).round() as i32,
        (d * 50.0).round() as i32,
    )
}

/// Boundary polygons keyed by quantized plane equation with a freshness
/// window.
pub struct BoundaryCache {
    ttl_us: u64,
    entries: FxHashMap<(i32, i32, i32, i32), (u64, Boundary)>,
}

impl BoundaryCache {
    /// Cache with the given freshness window.
    #[must_use]
    pub fn new(ttl_us: u64) -> Self {
        Self {
            ttl_us,
            entries: FxHashMap::default(),
        }
    }

    /// Reuse a fresh polygon or compute and store a new one.
    pub fn get_or_compute(
        &mut self,
        normal: Vec3,
        d: f32,
        now_us: u64,
        inliers: &[Vec3],
    ) -> Boundary {
        let key = cache_key(normal, d);
        if let Some((stamp, boundary)) = self.entries.get(&key) {
            if now_us.saturating_sub(*stamp) < self.ttl_us {
                return boundary.clone();
            }
        }
        let boundary = compute_boundary(inliers, normal, d);
        let _ = self.entries.insert(key, (now_us, boundary.clone()));
        boundary
    }

    /// Drop stale entries.
    pub fn evict_older_than(&mut self, now_us: u64) {
        let ttl = self.ttl_us;
        self.entries
            .retain(|_, (stamp, _)| now_us.saturating_sub(*stamp) < ttl * 4);
    }

    /// Number of cached polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_is_orthonormal_and_deterministic() {
        for n in [Vec3::Y, Vec3::X, Vec3::new(0.3, 0.8, 0.52).normalize()] {
            let (u, v) = plane_basis(n);
            assert!(u.dot(n).abs() < 1e-6);
            assert!(v.dot(n).abs() < 1e-6);
            assert!(u.dot(v).abs() < 1e-6);
            assert!((u.length() - 1.0).abs() < 1e-6);
            let (u2, v2) = plane_basis(n);
            assert_eq!((u, v), (u2, v2));
        }
    }

    #[test]
    fn hull_of_a_square_has_four_vertices() {
        let mut points = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];
        // Interior points must not appear on the hull.
        points.push(Vec2::new(0.5, 0.5));
        points.push(Vec2::new(0.25, 0.75));
        let hull = convex_hull(&points);
        assert_eq!(hull.len(), 4);
        assert!((polygon_area(&hull) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn simplify_drops_near_collinear_vertices() {
        let polygon = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.01), // 1 cm off the edge: dropped at 10 cm
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        let simplified = simplify(&polygon, SIMPLIFY_TOLERANCE_M);
        assert_eq!(simplified.len(), 4);
    }

    #[test]
    fn boundary_contains_the_sampled_region() {
        use rand::Rng as _;
        use rand::SeedableRng as _;
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let inliers: Vec<Vec3> = (0..500)
            .map(|_| {
                Vec3::new(
                    rng.random_range(-1.0..1.0),
                    0.0,
                    rng.random_range(-1.0..1.0),
                )
            })
            .collect();
        let boundary = compute_boundary(&inliers, Vec3::Y, 0.0);
        assert!(boundary.polygon.len() >= 3);
        // The hull of a 2x2 sampled square approaches area 4.
        assert!(boundary.area > 3.0, "area {}", boundary.area);
        for p in &boundary.polygon {
            assert!(p.y.abs() < 1e-5);
        }
    }

    #[test]
    fn cache_reuses_fresh_polygons() {
        let inliers = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
        ];
        let mut cache = BoundaryCache::new(1_000_000);
        let a = cache.get_or_compute(Vec3::Y, 0.0, 0, &inliers);
        // Within the window: the cached polygon comes back even with an
        // empty inlier list.
        let b = cache.get_or_compute(Vec3::Y, 0.0, 500_000, &[]);
        assert_eq!(a, b);
        // Past the window it recomputes.
        let c = cache.get_or_compute(Vec3::Y, 0.0, 2_000_000, &[]);
        assert!(c.polygon.is_empty());
    }
}
