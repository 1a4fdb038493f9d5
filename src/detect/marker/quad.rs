//! Polygon approximation and quad validation.
//!
//! Contours are simplified with Douglas-Peucker (epsilon proportional to
//! the perimeter); four-point results are ordered TL, TR, BR, BL and
//! validated for convexity, minimum edge length, and aspect ratio.

use glam::Vec2;

use crate::options::MarkerOptions;

use super::contour::Contour;

/// A validated candidate quadrilateral, ephemeral per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    /// Corners ordered clockwise from top-left.
    pub corners: [Vec2; 4],
    /// Enclosed area in square pixels.
    pub area: f32,
    /// Boundary length in pixels.
    pub perimeter: f32,
}

fn point_segment_distance(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < 1e-12 {
        return (p - a).length();
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).length()
}

fn dp_simplify(points: &[Vec2], epsilon: f32, out: &mut Vec<Vec2>) {
    if points.len() < 3 {
        out.extend_from_slice(points);
        return;
    }
    let first = points[0];
    let last = points[points.len() - 1];
    let mut max_dist = 0.0;
    let mut max_idx = 0;
    for (i, &p) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let d = point_segment_distance(p, first, last);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }
    if max_dist > epsilon {
        dp_simplify(&points[..=max_idx], epsilon, out);
        let _ = out.pop(); // avoid duplicating the split point
        dp_simplify(&points[max_idx..], epsilon, out);
    } else {
        out.push(first);
        out.push(last);
    }
}

/// Douglas-Peucker simplification of a closed contour.
///
/// The contour is split at the point farthest from its first point so the
/// open-polyline recursion applies; the closing edge is implicit in the
/// result.
#[must_use]
pub fn approximate_polygon(contour: &Contour, epsilon: f32) -> Vec<Vec2> {
    let pts: Vec<Vec2> = contour
        .points
        .iter()
        .map(|&(x, y)| Vec2::new(x, y))
        .collect();
    if pts.len() < 4 {
        return pts;
    }

    let anchor = 0usize;
    let far = pts
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            let da = (**a - pts[anchor]).length_squared();
            let db = (**b - pts[anchor]).length_squared();
            da.total_cmp(&db)
        })
        .map_or(pts.len() / 2, |(i, _)| i);

    let mut first_half = Vec::new();
    dp_simplify(&pts[anchor..=far], epsilon, &mut first_half);
    let mut second_half = Vec::new();
    let mut wrapped: Vec<Vec2> = pts[far..].to_vec();
    wrapped.push(pts[anchor]);
    dp_simplify(&wrapped, epsilon, &mut second_half);

    // Join halves, dropping the duplicated split and closing points.
    let mut out = first_half;
    let _ = out.pop();
    out.extend_from_slice(&second_half);
    let _ = out.pop();
    out.dedup_by(|a, b| (*a - *b).length_squared() < 1e-6);
    out
}

/// Order four corners TL, TR, BR, BL: sort by polar angle around the
/// centroid, then rotate so the lowest `x + y` corner comes first.
#[must_use]
pub fn order_corners(mut corners: [Vec2; 4]) -> [Vec2; 4] {
    let centroid = (corners[0] + corners[1] + corners[2] + corners[3]) * 0.25;
    // In image coordinates (y down) ascending angle is clockwise on
    // screen.
    corners.sort_by(|a, b| {
        let aa = (a.y - centroid.y).atan2(a.x - centroid.x);
        let ab = (b.y - centroid.y).atan2(b.x - centroid.x);
        aa.total_cmp(&ab)
    });
    let top_left = corners
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.x + a.y).total_cmp(&(b.x + b.y)))
        .map_or(0, |(i, _)| i);
    let mut ordered = [Vec2::ZERO; 4];
    for (i, slot) in ordered.iter_mut().enumerate() {
        *slot = corners[(top_left + i) % 4];
    }
    ordered
}

/// Whether four ordered corners form a convex polygon.
#[must_use]
pub fn is_convex(corners: &[Vec2; 4]) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let c = corners[(i + 2) % 4];
        let cross = (b - a).perp_dot(c - b);
        if cross.abs() < 1e-6 {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Validate an approximated 4-gon against the detector limits.
#[must_use]
pub fn validate(polygon: &[Vec2], opts: &MarkerOptions) -> Option<Quad> {
    if polygon.len() != 4 {
        return None;
    }
    let corners = order_corners([polygon[0], polygon[1], polygon[2], polygon[3]]);
    if !is_convex(&corners) {
        return None;
    }

    let mut edges = [0.0f32; 4];
    let mut perimeter = 0.0;
    for i in 0..4 {
        edges[i] = (corners[(i + 1) % 4] - corners[i]).length();
        perimeter += edges[i];
    }
    let mean_edge = perimeter / 4.0;
    if mean_edge < opts.min_edge {
        return None;
    }

    // Aspect from opposite edge pairs.
    let side_a = (edges[0] + edges[2]) * 0.5;
    let side_b = (edges[1] + edges[3]) * 0.5;
    let aspect = side_a.max(side_b) / side_a.min(side_b).max(1e-6);
    if aspect > opts.max_aspect {
        return None;
    }

    let mut area = 0.0f32;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        area += a.x * b.y - b.x * a.y;
    }
    Some(Quad {
        corners,
        area: area.abs() * 0.5,
        perimeter,
    })
}

fn point_in_quad(p: Vec2, quad: &Quad) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = quad.corners[i];
        let b = quad.corners[(i + 1) % 4];
        let cross = (b - a).perp_dot(p - a);
        if cross.abs() < 1e-6 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Drop quads nested inside a larger accepted quad (the inner edge of a
/// marker border traces as a second, smaller quad).
#[must_use]
pub fn suppress_nested(mut quads: Vec<Quad>) -> Vec<Quad> {
    quads.sort_by(|a, b| b.area.total_cmp(&a.area));
    let mut kept: Vec<Quad> = Vec::new();
    for quad in quads {
        let nested = kept.iter().any(|outer| {
            quad.area < outer.area * 0.95
                && quad.corners.iter().all(|&c| point_in_quad(c, outer))
        });
        if !nested {
            kept.push(quad);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> MarkerOptions {
        MarkerOptions::default()
    }

    fn rect_quad(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<Vec2> {
        vec![
            Vec2::new(x0, y0),
            Vec2::new(x1, y0),
            Vec2::new(x1, y1),
            Vec2::new(x0, y1),
        ]
    }

    #[test]
    fn orders_shuffled_corners_clockwise_from_tl() {
        let ordered = order_corners([
            Vec2::new(100.0, 10.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(10.0, 80.0),
            Vec2::new(100.0, 80.0),
        ]);
        assert_eq!(ordered[0], Vec2::new(10.0, 10.0));
        assert_eq!(ordered[1], Vec2::new(100.0, 10.0));
        assert_eq!(ordered[2], Vec2::new(100.0, 80.0));
        assert_eq!(ordered[3], Vec2::new(10.0, 80.0));
    }

    #[test]
    fn validates_a_square() {
        let quad = validate(&rect_quad(0.0, 0.0, 100.0, 100.0), &opts()).unwrap();
        assert!((quad.area - 10000.0).abs() < 1.0);
        assert!((quad.perimeter - 400.0).abs() < 1.0);
    }

    #[test]
    fn rejects_small_and_stretched_quads() {
        // Mean edge below 20 px.
        assert!(validate(&rect_quad(0.0, 0.0, 15.0, 15.0), &opts()).is_none());
        // Aspect ratio above 2.
        assert!(validate(&rect_quad(0.0, 0.0, 210.0, 100.0), &opts()).is_none());
        assert!(validate(&rect_quad(0.0, 0.0, 190.0, 100.0), &opts()).is_some());
    }

    #[test]
    fn rejects_concave_polygons() {
        let concave = [
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(30.0, 30.0),
            Vec2::new(0.0, 100.0),
        ];
        assert!(!is_convex(&concave));
        assert!(validate(&concave.to_vec(), &opts()).is_none());
    }

    #[test]
    fn approximation_reduces_rectangle_to_four_corners() {
        // Dense boundary of an axis-aligned rectangle.
        let mut points = Vec::new();
        for x in 0..100 {
            points.push((x as f32, 0.0));
        }
        for y in 0..60 {
            points.push((99.0, y as f32));
        }
        for x in (0..100).rev() {
            points.push((x as f32, 59.0));
        }
        for y in (1..60).rev() {
            points.push((0.0, y as f32));
        }
        let contour = Contour {
            perimeter: 2.0 * (99.0 + 59.0),
            area: 99.0 * 59.0,
            points,
        };
        let poly = approximate_polygon(&contour, 0.02 * contour.perimeter);
        assert_eq!(poly.len(), 4, "{poly:?}");
    }

    #[test]
    fn nested_quads_are_suppressed() {
        let outer = validate(&rect_quad(0.0, 0.0, 200.0, 200.0), &opts()).unwrap();
        let inner = validate(&rect_quad(30.0, 30.0, 170.0, 170.0), &opts()).unwrap();
        let kept = suppress_nested(vec![inner, outer]);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].area - outer.area).abs() < 1.0);
    }
}
