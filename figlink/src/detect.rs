//! Candidate region detection on page rasters.
//!
//! Three independent passes run over the same grayscale view of a page:
//!
//! - diagrams: adaptive threshold, external contours, size/shape filters
//! - tables: long horizontal and vertical strokes isolated by opening
//! - equations: Otsu threshold, short and wide single-line boxes
//!
//! Every accepted box is padded and clipped to the page. Detection never
//! fails; a page with nothing recognisable yields no candidates.

mod binarize;
mod morphology;

use image::GrayImage;
use imageproc::contours::{BorderType, Contour, find_contours};
use tracing::{debug, trace};

use crate::config::{DiagramConfig, EquationConfig, ExtractionConfig, TableConfig};
use crate::geometry::{BoundingBox, CandidateRegion, ContentType};
use crate::raster::PageRaster;

use binarize::{adaptive_threshold_inverted, otsu_threshold_inverted};
use morphology::{blend_equal, open_horizontal, open_vertical};

/// Runs the diagram, table and equation passes over a page.
#[derive(Debug, Clone)]
pub struct RegionDetector {
    diagram: DiagramConfig,
    table: TableConfig,
    equation: EquationConfig,
}

impl RegionDetector {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            diagram: config.diagram.clone(),
            table: config.table.clone(),
            equation: config.equation.clone(),
        }
    }

    /// Propose candidate regions for one page, diagrams first, then tables,
    /// then equations.
    pub fn detect(&self, page: &PageRaster, page_number: u32) -> Vec<CandidateRegion> {
        if page.is_degenerate() {
            debug!(
                page = page_number,
                width = page.width(),
                height = page.height(),
                "Skipping detection on degenerate page"
            );
            return Vec::new();
        }

        let gray = page.to_gray();
        let diagrams = self.detect_diagrams(&gray, page_number);
        let tables = self.detect_tables(&gray, page_number);
        let equations = self.detect_equations(&gray, page_number);

        debug!(
            page = page_number,
            diagrams = diagrams.len(),
            tables = tables.len(),
            equations = equations.len(),
            "Detection passes complete"
        );

        let mut candidates = diagrams;
        candidates.extend(tables);
        candidates.extend(equations);
        candidates
    }

    pub fn detect_diagrams(&self, gray: &GrayImage, page_number: u32) -> Vec<CandidateRegion> {
        let config = &self.diagram;
        let (width, height) = gray.dimensions();
        let binary =
            adaptive_threshold_inverted(gray, config.adaptive_block_size, config.adaptive_offset);

        collect(
            external_boxes(&binary),
            ContentType::Diagram,
            page_number,
            config.padding,
            (width, height),
            |bounds| accepts_diagram(config, bounds, width, height),
        )
    }

    pub fn detect_tables(&self, gray: &GrayImage, page_number: u32) -> Vec<CandidateRegion> {
        let config = &self.table;
        let (width, height) = gray.dimensions();
        let Some(ink) = otsu_threshold_inverted(gray) else {
            return Vec::new();
        };

        let horizontal = open_horizontal(&ink, config.horizontal_kernel);
        let vertical = open_vertical(&ink, config.vertical_kernel);
        let strokes = blend_equal(&horizontal, &vertical);

        collect(
            external_boxes(&strokes),
            ContentType::Table,
            page_number,
            config.padding,
            (width, height),
            |bounds| accepts_table(config, bounds) && fill_ratio(&strokes, bounds) <= config.max_fill_ratio,
        )
    }

    pub fn detect_equations(&self, gray: &GrayImage, page_number: u32) -> Vec<CandidateRegion> {
        let config = &self.equation;
        let (width, height) = gray.dimensions();
        let Some(ink) = otsu_threshold_inverted(gray) else {
            return Vec::new();
        };

        collect(
            external_boxes(&ink),
            ContentType::Equation,
            page_number,
            config.padding,
            (width, height),
            |bounds| accepts_equation(config, bounds),
        )
    }
}

/// Filter, pad and order the raw boxes of one pass.
fn collect(
    boxes: Vec<BoundingBox>,
    content_type: ContentType,
    page_number: u32,
    padding: u32,
    (width, height): (u32, u32),
    accept: impl Fn(&BoundingBox) -> bool,
) -> Vec<CandidateRegion> {
    let mut regions: Vec<CandidateRegion> = boxes
        .into_iter()
        .filter(|bounds| {
            let accepted = accept(bounds);
            trace!(
                page = page_number,
                kind = content_type.label(),
                bounds = %bounds,
                accepted,
                "Evaluated contour"
            );
            accepted
        })
        .filter_map(|bounds| bounds.padded(padding, width, height))
        .map(|bounds| CandidateRegion::new(bounds, content_type, page_number))
        .collect();

    regions.sort_by_key(|r| (r.bounds.y, r.bounds.x, r.bounds.width, r.bounds.height));
    regions
}

/// Bounding boxes of the outermost contours of a binary image.
fn external_boxes(binary: &GrayImage) -> Vec<BoundingBox> {
    find_contours::<u32>(binary)
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .filter_map(contour_bounds)
        .collect()
}

fn contour_bounds(contour: &Contour<u32>) -> Option<BoundingBox> {
    let first = contour.points.first()?;
    let (mut x1, mut y1, mut x2, mut y2) = (first.x, first.y, first.x, first.y);
    for point in &contour.points[1..] {
        x1 = x1.min(point.x);
        y1 = y1.min(point.y);
        x2 = x2.max(point.x);
        y2 = y2.max(point.y);
    }
    BoundingBox::from_corners(x1, y1, x2 + 1, y2 + 1)
}

/// Share of foreground pixels inside `bounds`.
fn fill_ratio(binary: &GrayImage, bounds: &BoundingBox) -> f64 {
    let mut on = 0u64;
    for y in bounds.y..bounds.bottom() {
        for x in bounds.x..bounds.right() {
            if binary.get_pixel(x, y)[0] > 0 {
                on += 1;
            }
        }
    }
    on as f64 / bounds.area() as f64
}

pub(crate) fn accepts_diagram(
    config: &DiagramConfig,
    bounds: &BoundingBox,
    page_width: u32,
    page_height: u32,
) -> bool {
    let aspect = bounds.aspect_ratio();
    bounds.area() > config.min_area
        && (config.min_aspect_ratio..=config.max_aspect_ratio).contains(&aspect)
        && bounds.width > config.min_width
        && bounds.height > config.min_height
        && bounds.width as f64 <= page_width as f64 * config.max_page_fraction
        && bounds.height as f64 <= page_height as f64 * config.max_page_fraction
}

pub(crate) fn accepts_table(config: &TableConfig, bounds: &BoundingBox) -> bool {
    bounds.area() > config.min_area
        && bounds.width > config.min_width
        && bounds.height > config.min_height
}

pub(crate) fn accepts_equation(config: &EquationConfig, bounds: &BoundingBox) -> bool {
    let area = bounds.area();
    area > config.min_area
        && area < config.max_area
        && bounds.aspect_ratio() > config.min_aspect_ratio
        && bounds.height > config.min_height
        && bounds.height < config.max_height
        && bounds.width > config.min_width
}
