//! Page rasters handed to the engine by the rasterizer.

use image::{DynamicImage, GrayImage};

/// Resolution the default thresholds are tuned for.
pub const DEFAULT_DPI: u32 = 300;

/// Immutable pixels of one document page at a fixed resolution.
///
/// The engine only ever reads the raster; detection works on a grayscale
/// view and cropping reads from the original pixels.
#[derive(Debug, Clone)]
pub struct PageRaster {
    image: DynamicImage,
    dpi: u32,
}

impl PageRaster {
    pub fn new(image: DynamicImage, dpi: u32) -> Self {
        Self { image, dpi }
    }

    /// Wrap an image rendered at the default resolution.
    pub fn at_default_dpi(image: DynamicImage) -> Self {
        Self::new(image, DEFAULT_DPI)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Number of channels per pixel.
    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// A page with zero area carries nothing to detect or crop.
    pub fn is_degenerate(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// 8-bit luma view used by the detector passes.
    pub fn to_gray(&self) -> GrayImage {
        self.image.to_luma8()
    }
}

impl From<GrayImage> for PageRaster {
    fn from(image: GrayImage) -> Self {
        Self::at_default_dpi(DynamicImage::ImageLuma8(image))
    }
}
