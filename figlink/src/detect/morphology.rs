//! Binary morphology with line-shaped structuring elements.
//!
//! Opening a binary image with a 1-pixel-thick line of length `k` keeps
//! exactly the foreground runs of at least `k` pixels along that direction,
//! so both openings are computed as run-length filters.

use image::{GrayImage, Luma};

/// Keep horizontal foreground runs at least `length` pixels long.
pub fn open_horizontal(binary: &GrayImage, length: u32) -> GrayImage {
    let (width, height) = binary.dimensions();
    let mut output = GrayImage::new(width, height);

    for y in 0..height {
        let mut run_start = None;
        for x in 0..=width {
            let on = x < width && binary.get_pixel(x, y)[0] > 0;
            match (on, run_start) {
                (true, None) => run_start = Some(x),
                (false, Some(start)) => {
                    if x - start >= length {
                        for rx in start..x {
                            output.put_pixel(rx, y, Luma([255]));
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    output
}

/// Keep vertical foreground runs at least `length` pixels long.
pub fn open_vertical(binary: &GrayImage, length: u32) -> GrayImage {
    let (width, height) = binary.dimensions();
    let mut output = GrayImage::new(width, height);

    for x in 0..width {
        let mut run_start = None;
        for y in 0..=height {
            let on = y < height && binary.get_pixel(x, y)[0] > 0;
            match (on, run_start) {
                (true, None) => run_start = Some(y),
                (false, Some(start)) => {
                    if y - start >= length {
                        for ry in start..y {
                            output.put_pixel(x, ry, Luma([255]));
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    output
}

/// Blend two stroke maps with equal weight (rounded half up).
pub fn blend_equal(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let sum = a.get_pixel(x, y)[0] as u16 + b.get_pixel(x, y)[0] as u16;
        Luma([sum.div_ceil(2) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_from_rows(rows: &[&str]) -> GrayImage {
        let width = rows[0].len() as u32;
        GrayImage::from_fn(width, rows.len() as u32, |x, y| {
            if rows[y as usize].as_bytes()[x as usize] == b'#' {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_open_horizontal_keeps_long_runs_only() {
        let binary = binary_from_rows(&["#####..##.", "..........", "##########"]);
        let opened = open_horizontal(&binary, 5);

        assert!((0..5).all(|x| opened.get_pixel(x, 0)[0] == 255));
        assert_eq!(opened.get_pixel(7, 0)[0], 0);
        assert!((0..10).all(|x| opened.get_pixel(x, 2)[0] == 255));
    }

    #[test]
    fn test_open_vertical_keeps_long_runs_only() {
        let binary = binary_from_rows(&["#.#", "#.#", "#..", "#.#"]);
        let opened = open_vertical(&binary, 3);

        assert!((0..4).all(|y| opened.get_pixel(0, y)[0] == 255));
        assert!((0..4).all(|y| opened.get_pixel(2, y)[0] == 0));
    }

    #[test]
    fn test_blend_equal() {
        let on = GrayImage::from_pixel(1, 1, Luma([255]));
        let off = GrayImage::from_pixel(1, 1, Luma([0]));

        assert_eq!(blend_equal(&on, &on).get_pixel(0, 0)[0], 255);
        assert_eq!(blend_equal(&on, &off).get_pixel(0, 0)[0], 128);
        assert_eq!(blend_equal(&off, &off).get_pixel(0, 0)[0], 0);
    }
}
