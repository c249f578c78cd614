//! Grayscale to binary conversions. Ink becomes foreground (255).

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;

/// Gaussian-weighted adaptive threshold, inverted so dark ink is foreground.
///
/// A pixel is foreground when it is at least `offset` darker than the
/// Gaussian-weighted mean of its `block_size` neighbourhood. Flat areas,
/// including the interior of solid fills, stay background.
pub fn adaptive_threshold_inverted(gray: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    let local_mean = gaussian_blur_f32(gray, block_sigma(block_size));

    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0] as f32;
        let threshold = local_mean.get_pixel(x, y)[0] as f32 - offset;
        if value <= threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Global Otsu threshold, inverted so dark ink is foreground.
///
/// Returns `None` for single-valued images, which have no ink to separate.
pub fn otsu_threshold_inverted(gray: &GrayImage) -> Option<GrayImage> {
    let mut pixels = gray.pixels();
    let first = pixels.next()?[0];
    if pixels.all(|p| p[0] == first) {
        return None;
    }

    let level = otsu_level(gray);
    Some(GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] <= level {
            Luma([255])
        } else {
            Luma([0])
        }
    }))
}

/// Standard deviation of the Gaussian window matching a square block size.
fn block_sigma(block_size: u32) -> f32 {
    let block = block_size.max(3) as f32;
    0.3 * ((block - 1.0) * 0.5 - 1.0) + 0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_block(width: u32, height: u32, x1: u32, y1: u32, x2: u32, y2: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if (x1..x2).contains(&x) && (y1..y2).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_adaptive_threshold_marks_edges_not_interior() {
        let gray = page_with_block(120, 120, 30, 30, 90, 90);
        let binary = adaptive_threshold_inverted(&gray, 11, 2.0);

        // Just inside the block edge is ink
        assert_eq!(binary.get_pixel(30, 60)[0], 255);
        // Deep interior is flat and stays background
        assert_eq!(binary.get_pixel(60, 60)[0], 0);
        // Paper stays background
        assert_eq!(binary.get_pixel(10, 10)[0], 0);
        assert_eq!(binary.get_pixel(29, 60)[0], 0);
    }

    #[test]
    fn test_otsu_separates_ink_from_paper() {
        let gray = page_with_block(50, 50, 10, 10, 20, 20);
        let binary = otsu_threshold_inverted(&gray).unwrap();

        assert_eq!(binary.get_pixel(15, 15)[0], 255);
        assert_eq!(binary.get_pixel(30, 30)[0], 0);
    }

    #[test]
    fn test_otsu_on_blank_page_is_none() {
        let gray = GrayImage::from_pixel(50, 50, Luma([255]));
        assert!(otsu_threshold_inverted(&gray).is_none());
    }

    #[test]
    fn test_block_sigma_matches_window() {
        assert!((block_sigma(11) - 2.0).abs() < 1e-6);
        assert!((block_sigma(3) - 0.8).abs() < 1e-6);
    }
}
