//! CPU reference implementations of the preprocessing operators.
//!
//! Bit-compatible (up to rounding) with the WGSL kernels. Used for
//! still-image detection without a device, for detector fallbacks on the
//! emulation backend, and as the oracle the kernel tests compare against.

/// A tightly packed 8-bit grayscale image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    /// Row-major luminance bytes.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl GrayImage {
    /// Image from parts; `data` must be `width * height` bytes.
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self {
            data,
            width,
            height,
        }
    }

    /// Pixel value with edge clamping.
    #[must_use]
    pub fn get(&self, x: i32, y: i32) -> u8 {
        let cx = x.clamp(0, self.width as i32 - 1) as u32;
        let cy = y.clamp(0, self.height as i32 - 1) as u32;
        self.data[(cy * self.width + cx) as usize]
    }

    /// Bilinear sample at a fractional coordinate.
    #[must_use]
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let bx = x.floor();
        let by = y.floor();
        let fx = x - bx;
        let fy = y - by;
        let (ix, iy) = (bx as i32, by as i32);
        let p00 = f32::from(self.get(ix, iy));
        let p10 = f32::from(self.get(ix + 1, iy));
        let p01 = f32::from(self.get(ix, iy + 1));
        let p11 = f32::from(self.get(ix + 1, iy + 1));
        let top = p00 + (p10 - p00) * fx;
        let bottom = p01 + (p11 - p01) * fx;
        top + (bottom - top) * fy
    }
}

/// RGBA bytes to luminance, Rec. 601 weights (matches the kernel).
#[must_use]
pub fn grayscale(rgba: &[u8], width: u32, height: u32) -> GrayImage {
    debug_assert_eq!(rgba.len(), (width * height * 4) as usize);
    let mut data = Vec::with_capacity((width * height) as usize);
    for px in rgba.chunks_exact(4) {
        let luma = 0.299 * f32::from(px[0])
            + 0.587 * f32::from(px[1])
            + 0.114 * f32::from(px[2]);
        data.push(luma.round().clamp(0.0, 255.0) as u8);
    }
    GrayImage::new(data, width, height)
}

const BLUR_WEIGHTS: [f32; 5] = [0.0614, 0.2448, 0.3877, 0.2448, 0.0614];

/// Separable 5-tap Gaussian blur (sigma ~= 1), matching the kernel pair.
#[must_use]
pub fn gaussian_blur(src: &GrayImage) -> GrayImage {
    let (w, h) = (src.width, src.height);
    let mut horizontal = vec![0f32; (w * h) as usize];
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let mut acc = 0.0;
            for (i, weight) in BLUR_WEIGHTS.iter().enumerate() {
                acc += weight * f32::from(src.get(x + i as i32 - 2, y));
            }
            horizontal[(y as u32 * w + x as u32) as usize] = acc;
        }
    }
    let mut data = vec![0u8; (w * h) as usize];
    let get_h = |x: i32, y: i32| {
        let cx = x.clamp(0, w as i32 - 1) as u32;
        let cy = y.clamp(0, h as i32 - 1) as u32;
        horizontal[(cy * w + cx) as usize]
    };
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let mut acc = 0.0;
            for (i, weight) in BLUR_WEIGHTS.iter().enumerate() {
                acc += weight * get_h(x, y + i as i32 - 2);
            }
            data[(y as u32 * w + x as u32) as usize] =
                acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    GrayImage::new(data, w, h)
}

/// Adaptive threshold: foreground (1) where the pixel is darker than the
/// local window mean minus `c`. The window is clamped to odd positive.
#[must_use]
pub fn adaptive_threshold(src: &GrayImage, window: u32, c: f32) -> GrayImage {
    let window = super::clamp_window(window);
    let radius = (window / 2) as i32;
    let (w, h) = (src.width, src.height);
    let mut data = vec![0u8; (w * h) as usize];
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let mut sum = 0u32;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    sum += u32::from(src.get(x + dx, y + dy));
                }
            }
            let count = (window * window) as f32;
            let mean = sum as f32 / count;
            if f32::from(src.get(x, y)) < mean - c {
                data[(y as u32 * w + x as u32) as usize] = 1;
            }
        }
    }
    GrayImage::new(data, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_weights_sum_to_full_white() {
        let rgba = vec![255u8; 4];
        let gray = grayscale(&rgba, 1, 1);
        assert_eq!(gray.data[0], 255);
    }

    #[test]
    fn grayscale_favors_green() {
        let red = grayscale(&[255, 0, 0, 255], 1, 1).data[0];
        let green = grayscale(&[0, 255, 0, 255], 1, 1).data[0];
        let blue = grayscale(&[0, 0, 255, 255], 1, 1).data[0];
        assert!(green > red && red > blue);
    }

    #[test]
    fn blur_preserves_flat_regions() {
        let img = GrayImage::new(vec![100u8; 64], 8, 8);
        let blurred = gaussian_blur(&img);
        for &v in &blurred.data {
            assert!((i16::from(v) - 100).abs() <= 1);
        }
    }

    #[test]
    fn blur_softens_an_edge() {
        // Left half black, right half white.
        let mut data = vec![0u8; 16 * 8];
        for y in 0..8 {
            for x in 8..16 {
                data[y * 16 + x] = 255;
            }
        }
        let blurred = gaussian_blur(&GrayImage::new(data, 16, 8));
        // The pixel just left of the edge picks up white energy.
        assert!(blurred.get(7, 4) > 0);
        assert!(blurred.get(8, 4) < 255);
    }

    #[test]
    fn threshold_marks_dark_blob_as_foreground() {
        // White field with a dark 4x4 blob.
        let mut data = vec![220u8; 32 * 32];
        for y in 14..18 {
            for x in 14..18 {
                data[y * 32 + x] = 10;
            }
        }
        let binary =
            adaptive_threshold(&GrayImage::new(data, 32, 32), 15, 7.0);
        assert_eq!(binary.get(15, 15), 1);
        assert_eq!(binary.get(2, 2), 0);
    }

    #[test]
    fn bilinear_sampling_interpolates() {
        let img = GrayImage::new(vec![0, 100, 0, 100], 2, 2);
        let mid = img.sample_bilinear(0.5, 0.0);
        assert!((mid - 50.0).abs() < 1e-3);
    }
}
