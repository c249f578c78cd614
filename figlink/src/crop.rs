//! Cropping canonical regions into encoded content records.
//!
//! Every page yields at least one record: when no region survives (or every
//! region fails to encode) the margin-trimmed page interior is used instead.

use std::collections::HashMap;
use std::io::Cursor;

use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CropConfig, OutputFormat};
use crate::error::ExtractionError;
use crate::geometry::{BoundingBox, CandidateRegion, ContentType};
use crate::hash::content_hash;
use crate::raster::PageRaster;

/// Prefix for record identifiers and stored names.
///
/// Passing the same namespace again reproduces the same identifiers, which
/// lets a caller overwrite an earlier run; a fresh namespace keeps both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdNamespace(String);

impl IdNamespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn record_id(&self, page: u32, sequence: u32) -> String {
        format!("{}-{}-{}", self.0, page, sequence)
    }

    fn stored_name(&self, page: u32, content_type: ContentType, index: u32, extension: &str) -> String {
        format!(
            "{}_page_{}_{}_{}.{}",
            self.0,
            page,
            content_type.label(),
            index,
            extension
        )
    }
}

impl Default for IdNamespace {
    fn default() -> Self {
        Self::new("doc")
    }
}

/// One extracted piece of visual content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Unique within the document: `{namespace}-{page}-{sequence}`.
    pub id: String,
    /// Storage name: `{namespace}_page_{page}_{kind}_{index}.{ext}`.
    pub name: String,
    pub page: u32,
    pub content_type: ContentType,
    /// Region of the page raster the crop was taken from.
    pub bounds: BoundingBox,
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
    pub mime_type: String,
    /// Pixel dimensions of the encoded image.
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    /// SHA-256 of `image_bytes`.
    pub content_hash: String,
}

/// A region that could not be turned into a record.
#[derive(Debug)]
pub struct CropDiagnostic {
    pub page: u32,
    pub content_type: ContentType,
    pub error: ExtractionError,
}

/// Records and diagnostics produced for one page.
#[derive(Debug, Default)]
pub struct PageCrops {
    pub records: Vec<ContentRecord>,
    pub diagnostics: Vec<CropDiagnostic>,
    pub used_fallback: bool,
}

/// Picks the representative region used when detection found nothing.
#[derive(Debug, Clone, Copy)]
pub struct FallbackSelector {
    margin: f64,
}

impl FallbackSelector {
    pub fn new(margin: f64) -> Self {
        Self { margin }
    }

    /// The page with `margin` of its width/height trimmed from every edge.
    /// Pages too small to trim fall back to the whole page.
    pub fn select(&self, page_width: u32, page_height: u32) -> Option<BoundingBox> {
        let x1 = (page_width as f64 * self.margin) as u32;
        let y1 = (page_height as f64 * self.margin) as u32;
        let x2 = (page_width as f64 * (1.0 - self.margin)) as u32;
        let y2 = (page_height as f64 * (1.0 - self.margin)) as u32;

        BoundingBox::from_corners(x1, y1, x2.min(page_width), y2.min(page_height))
            .or_else(|| BoundingBox::new(0, 0, page_width, page_height))
    }
}

/// Identifier and per-kind counters for one page.
#[derive(Default)]
struct PageSequence {
    next: u32,
    per_kind: HashMap<ContentType, u32>,
}

impl PageSequence {
    fn advance(&mut self, content_type: ContentType) -> (u32, u32) {
        self.next += 1;
        let index = self.per_kind.entry(content_type).or_insert(0);
        *index += 1;
        (self.next, *index)
    }
}

/// Turns canonical regions into encoded [`ContentRecord`]s.
#[derive(Debug, Clone)]
pub struct RegionCropper {
    config: CropConfig,
    namespace: IdNamespace,
    fallback: FallbackSelector,
}

impl RegionCropper {
    pub fn new(config: &CropConfig, namespace: IdNamespace) -> Self {
        Self {
            config: config.clone(),
            namespace,
            fallback: FallbackSelector::new(config.fallback_margin),
        }
    }

    /// Crop and encode every region of one page.
    ///
    /// A region that fails is reported in `diagnostics` and does not stop the
    /// others. If nothing was produced, the fallback region is cropped.
    pub fn crop(&self, page: &PageRaster, page_number: u32, regions: &[CandidateRegion]) -> PageCrops {
        let mut crops = PageCrops::default();
        let mut sequence = PageSequence::default();

        for region in regions {
            match self.crop_region(page, page_number, region.bounds) {
                Ok((image, bounds)) => {
                    match self.encode_record(image, bounds, page_number, region.content_type, &mut sequence) {
                        Ok(record) => crops.records.push(record),
                        Err(error) => crops.push_failure(page_number, region.content_type, error),
                    }
                }
                Err(error) => crops.push_failure(page_number, region.content_type, error),
            }
        }

        if crops.records.is_empty() {
            crops.used_fallback = true;
            match self.fallback.select(page.width(), page.height()) {
                Some(bounds) => {
                    let result = self
                        .crop_region(page, page_number, bounds)
                        .and_then(|(image, bounds)| {
                            self.encode_record(
                                image,
                                bounds,
                                page_number,
                                ContentType::Representative,
                                &mut sequence,
                            )
                        });
                    match result {
                        Ok(record) => {
                            debug!(page = page_number, bounds = %record.bounds, "Using representative crop");
                            crops.records.push(record);
                        }
                        Err(error) => crops.push_failure(page_number, ContentType::Representative, error),
                    }
                }
                None => crops.push_failure(
                    page_number,
                    ContentType::Representative,
                    ExtractionError::DegeneratePage {
                        page: page_number,
                        width: page.width(),
                        height: page.height(),
                    },
                ),
            }
        }

        debug!(
            page = page_number,
            records = crops.records.len(),
            dropped = crops.diagnostics.len(),
            fallback = crops.used_fallback,
            "Cropped page regions"
        );
        crops
    }

    fn crop_region(
        &self,
        page: &PageRaster,
        page_number: u32,
        bounds: BoundingBox,
    ) -> Result<(DynamicImage, BoundingBox), ExtractionError> {
        let clipped = bounds
            .clipped(page.width(), page.height())
            .ok_or(ExtractionError::EmptyCrop {
                page: page_number,
                bounds,
            })?;

        let mut image = page
            .image()
            .crop_imm(clipped.x, clipped.y, clipped.width, clipped.height);

        if let Some(max_width) = self.config.max_output_width
            && image.width() > max_width
        {
            let height = (image.height() as f64 * max_width as f64 / image.width() as f64).round() as u32;
            image = image.resize_exact(max_width, height.max(1), FilterType::Lanczos3);
        }

        Ok((image, clipped))
    }

    fn encode_record(
        &self,
        image: DynamicImage,
        bounds: BoundingBox,
        page_number: u32,
        content_type: ContentType,
        sequence: &mut PageSequence,
    ) -> Result<ContentRecord, ExtractionError> {
        let format = self.config.format;
        let image_bytes = encode(&image, format).map_err(|source| ExtractionError::Encode {
            page: page_number,
            bounds,
            source,
        })?;

        let (id, index) = sequence.advance(content_type);
        Ok(ContentRecord {
            id: self.namespace.record_id(page_number, id),
            name: self
                .namespace
                .stored_name(page_number, content_type, index, format.extension()),
            page: page_number,
            content_type,
            bounds,
            mime_type: format.mime_type().to_string(),
            width: image.width(),
            height: image.height(),
            byte_size: image_bytes.len() as u64,
            content_hash: content_hash(&image_bytes),
            image_bytes,
        })
    }
}

impl PageCrops {
    fn push_failure(&mut self, page: u32, content_type: ContentType, error: ExtractionError) {
        warn!(page, content_type = ?content_type, error = %error, "Dropping region");
        self.diagnostics.push(CropDiagnostic {
            page,
            content_type,
            error,
        });
    }
}

/// Losslessly encode an image in the configured format.
fn encode(image: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        OutputFormat::Png => image.write_to(&mut buffer, ImageFormat::Png)?,
        OutputFormat::Webp => {
            let rgba = image.to_rgba8();
            WebPEncoder::new_lossless(&mut buffer).write_image(
                rgba.as_raw(),
                rgba.width(),
                rgba.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
    }
    Ok(buffer.into_inner())
}
