//! FAST corner response and non-max suppression.
//!
//! The response function mirrors the GPU kernel exactly: a pixel is a
//! corner when at least 12 contiguous of the 16 radius-3 ring pixels are
//! uniformly brighter or darker than the center by more than the
//! threshold, scored by the summed excess over the qualifying arc. The
//! suppression and top-K selection always run on the CPU, over either
//! the kernel's readback or a CPU-computed response map.

use glam::Vec2;

use crate::frame::Keypoint;
use crate::preprocess::cpu::GrayImage;

/// The 16-pixel Bresenham ring at radius 3, clockwise from north.
pub const RING: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

const ARC: usize = 12;

/// Corner response at one pixel; zero when the pixel is not a corner or
/// the ring leaves the image.
#[must_use]
pub fn response(gray: &GrayImage, x: i32, y: i32, threshold: f32) -> f32 {
    let w = gray.width as i32;
    let h = gray.height as i32;
    if x < 3 || y < 3 || x >= w - 3 || y >= h - 3 {
        return 0.0;
    }
    let c = f32::from(gray.get(x, y));
    let mut ring = [0.0f32; 16];
    for (i, (dx, dy)) in RING.iter().enumerate() {
        ring[i] = f32::from(gray.get(x + dx, y + dy));
    }

    let mut best = 0.0f32;
    for start in 0..16 {
        let mut brighter = 0.0;
        let mut darker = 0.0;
        let mut all_brighter = true;
        let mut all_darker = true;
        for k in 0..ARC {
            let v = ring[(start + k) % 16];
            if v <= c + threshold {
                all_brighter = false;
            } else {
                brighter += v - c - threshold;
            }
            if v >= c - threshold {
                all_darker = false;
            } else {
                darker += c - v - threshold;
            }
        }
        if all_brighter {
            best = best.max(brighter);
        }
        if all_darker {
            best = best.max(darker);
        }
    }
    best
}

/// Response map for a whole image (CPU reference of the kernel).
#[must_use]
pub fn response_map(gray: &GrayImage, threshold: f32) -> Vec<f32> {
    let mut out = vec![0.0f32; (gray.width * gray.height) as usize];
    for y in 0..gray.height as i32 {
        for x in 0..gray.width as i32 {
            out[(y as u32 * gray.width + x as u32) as usize] =
                response(gray, x, y, threshold);
        }
    }
    out
}

/// 3x3 non-max suppression plus top-K selection by response.
#[must_use]
pub fn non_max_suppression(
    responses: &[f32],
    width: u32,
    height: u32,
    max_keypoints: usize,
) -> Vec<Keypoint> {
    let at = |x: i32, y: i32| -> f32 {
        if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
            0.0
        } else {
            responses[(y as u32 * width + x as u32) as usize]
        }
    };

    let mut keypoints = Vec::new();
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let r = at(x, y);
            if r <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'outer: for dy in -1..=1 {
                for dx in -1..=1 {
                    if (dx, dy) == (0, 0) {
                        continue;
                    }
                    let n = at(x + dx, y + dy);
                    // Ties break toward the lexically first pixel.
                    if n > r || (n == r && (dy, dx) < (0, 0)) {
                        is_max = false;
                        break 'outer;
                    }
                }
            }
            if is_max {
                keypoints.push(Keypoint {
                    position: Vec2::new(x as f32, y as f32),
                    angle: 0.0,
                    response: r,
                    octave: 0,
                });
            }
        }
    }

    keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
    keypoints.truncate(max_keypoints);
    keypoints
}

#[cfg(test)]
mod tests {
    use super::*;

    /// White square on black: its corners are FAST corners.
    fn corner_image() -> GrayImage {
        let mut data = vec![0u8; 64 * 64];
        for y in 20..44 {
            for x in 20..44 {
                data[y * 64 + x] = 255;
            }
        }
        GrayImage::new(data, 64, 64)
    }

    #[test]
    fn square_corners_respond() {
        let img = corner_image();
        let t = 20.0;
        assert!(response(&img, 20, 20, t) > 0.0);
        assert!(response(&img, 43, 43, t) > 0.0);
        // Flat interior and straight edges do not.
        assert_eq!(response(&img, 32, 32, t), 0.0);
        assert_eq!(response(&img, 32, 20, t), 0.0);
    }

    #[test]
    fn border_pixels_never_respond() {
        let img = corner_image();
        assert_eq!(response(&img, 1, 1, 10.0), 0.0);
        assert_eq!(response(&img, 63, 63, 10.0), 0.0);
    }

    #[test]
    fn nms_keeps_local_maxima_only() {
        let mut responses = vec![0.0f32; 100];
        responses[5 * 10 + 5] = 10.0;
        responses[5 * 10 + 6] = 8.0; // suppressed neighbor
        responses[2 * 10 + 2] = 4.0;
        let kps = non_max_suppression(&responses, 10, 10, 10);
        assert_eq!(kps.len(), 2);
        assert_eq!(kps[0].position, Vec2::new(5.0, 5.0));
        assert_eq!(kps[1].position, Vec2::new(2.0, 2.0));
    }

    #[test]
    fn top_k_caps_keypoint_count() {
        let img = corner_image();
        let map = response_map(&img, 20.0);
        let kps = non_max_suppression(&map, 64, 64, 2);
        assert_eq!(kps.len(), 2);
        // Strongest first.
        assert!(kps[0].response >= kps[1].response);
    }
}
