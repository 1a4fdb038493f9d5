//! Border following on the thresholded binary image.
//!
//! Foreground (1) pixels are marker borders after the adaptive threshold.
//! Contours are traced with 8-connected Moore neighbor following and a
//! visited mask, producing closed boundary polygons with area (shoelace)
//! and perimeter.

use crate::preprocess::cpu::GrayImage;

/// A closed boundary traced from the binary image.
#[derive(Debug, Clone)]
pub struct Contour {
    /// Ordered boundary pixels.
    pub points: Vec<(f32, f32)>,
    /// Enclosed area in square pixels (shoelace, non-negative).
    pub area: f32,
    /// Boundary length in pixels.
    pub perimeter: f32,
}

/// Moore neighborhood in clockwise order starting east.
const NEIGHBORS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

fn shoelace_area(points: &[(f32, f32)]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0f64;
    for i in 0..points.len() {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % points.len()];
        acc += f64::from(x0) * f64::from(y1) - f64::from(x1) * f64::from(y0);
    }
    (acc.abs() * 0.5) as f32
}

fn perimeter_of(points: &[(f32, f32)]) -> f32 {
    let mut acc = 0.0;
    for i in 0..points.len() {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % points.len()];
        acc += ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    }
    acc
}

/// Trace every outer boundary in the binary image.
///
/// Contours shorter than `min_points` boundary pixels are discarded
/// before any geometry is computed.
#[must_use]
pub fn trace_contours(binary: &GrayImage, min_points: usize) -> Vec<Contour> {
    let w = binary.width as i32;
    let h = binary.height as i32;
    let mut visited = vec![false; (binary.width * binary.height) as usize];
    let mut contours = Vec::new();

    let fg = |x: i32, y: i32| -> bool {
        x >= 0 && y >= 0 && x < w && y < h && binary.get(x, y) != 0
    };

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            // A boundary start: foreground with background to its left,
            // not already part of a traced boundary.
            if !fg(x, y) || visited[idx] || fg(x - 1, y) {
                continue;
            }

            let mut points: Vec<(i32, i32)> = Vec::new();
            let start = (x, y);
            let mut current = start;
            // Backtrack direction: we entered from the west.
            let mut dir = 4usize;
            let max_steps = (w * h * 4) as usize;

            loop {
                visited[(current.1 * w + current.0) as usize] = true;
                points.push(current);

                // Search clockwise from just past the backtrack direction.
                let mut found = None;
                for k in 1..=8 {
                    let probe = (dir + k) % 8;
                    let (dx, dy) = NEIGHBORS[probe];
                    let next = (current.0 + dx, current.1 + dy);
                    if fg(next.0, next.1) {
                        found = Some((next, probe));
                        break;
                    }
                }
                let Some((next, probe)) = found else {
                    break; // isolated pixel
                };
                if next == start && points.len() > 1 {
                    break;
                }
                current = next;
                // New backtrack points at the previous pixel.
                dir = (probe + 4) % 8;
                if points.len() > max_steps {
                    log::warn!("contour trace aborted (runaway boundary)");
                    break;
                }
            }

            if points.len() < min_points {
                continue;
            }
            let pts: Vec<(f32, f32)> = points
                .iter()
                .map(|&(px, py)| (px as f32, py as f32))
                .collect();
            contours.push(Contour {
                area: shoelace_area(&pts),
                perimeter: perimeter_of(&pts),
                points: pts,
            });
        }
    }
    contours
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with_rect(
        w: u32,
        h: u32,
        x0: u32,
        y0: u32,
        x1: u32,
        y1: u32,
    ) -> GrayImage {
        let mut data = vec![0u8; (w * h) as usize];
        for y in y0..=y1 {
            for x in x0..=x1 {
                data[(y * w + x) as usize] = 1;
            }
        }
        GrayImage::new(data, w, h)
    }

    #[test]
    fn traces_one_contour_for_a_filled_rect() {
        let img = image_with_rect(40, 40, 10, 10, 29, 24);
        let contours = trace_contours(&img, 8);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        // 20 x 15 rectangle: boundary area close to the fill.
        assert!((c.area - 19.0 * 14.0).abs() < 20.0, "area {}", c.area);
        assert!(
            (c.perimeter - 2.0 * (19.0 + 14.0)).abs() < 8.0,
            "perimeter {}",
            c.perimeter
        );
    }

    #[test]
    fn skips_tiny_specks() {
        let mut data = vec![0u8; 100];
        data[55] = 1;
        let img = GrayImage::new(data, 10, 10);
        assert!(trace_contours(&img, 8).is_empty());
    }

    #[test]
    fn separate_blobs_give_separate_contours() {
        let mut img = image_with_rect(64, 32, 4, 4, 20, 20);
        for y in 4..=20 {
            for x in 40..=56 {
                img.data[(y * 64 + x) as usize] = 1;
            }
        }
        let contours = trace_contours(&img, 8);
        assert_eq!(contours.len(), 2);
    }

    #[test]
    fn empty_image_has_no_contours() {
        let img = GrayImage::new(vec![0u8; 64], 8, 8);
        assert!(trace_contours(&img, 1).is_empty());
    }
}
