//! Tunable thresholds for detection, merging, cropping and matching.
//!
//! Every heuristic constant lives here as a named field with a documented
//! default. Pixel values are tuned for rasters at `pipeline.reference_dpi`;
//! use [`ExtractionConfig::scaled_for_dpi`] for pages rendered at another
//! resolution.

mod loader;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::ContentType;

pub use loader::{load_config, load_config_from};

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub diagram: DiagramConfig,

    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub equation: EquationConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub crop: CropConfig,

    #[serde(default)]
    pub matching: MatchConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Diagram pass: adaptive threshold, external contours, size and shape filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramConfig {
    /// Side of the square window used for the local threshold (odd, >= 3).
    #[serde(default = "default_adaptive_block_size")]
    pub adaptive_block_size: u32,

    /// Amount subtracted from the local mean before comparing.
    #[serde(default = "default_adaptive_offset")]
    pub adaptive_offset: f32,

    /// Boxes must be strictly larger than this (px²).
    #[serde(default = "default_diagram_min_area")]
    pub min_area: u64,

    #[serde(default = "default_diagram_min_aspect_ratio")]
    pub min_aspect_ratio: f64,

    #[serde(default = "default_diagram_max_aspect_ratio")]
    pub max_aspect_ratio: f64,

    #[serde(default = "default_diagram_min_side")]
    pub min_width: u32,

    #[serde(default = "default_diagram_min_side")]
    pub min_height: u32,

    /// Boxes spanning more than this fraction of either page dimension are
    /// treated as whole-page false positives.
    #[serde(default = "default_max_page_fraction")]
    pub max_page_fraction: f64,

    #[serde(default = "default_diagram_padding")]
    pub padding: u32,
}

impl Default for DiagramConfig {
    fn default() -> Self {
        Self {
            adaptive_block_size: default_adaptive_block_size(),
            adaptive_offset: default_adaptive_offset(),
            min_area: default_diagram_min_area(),
            min_aspect_ratio: default_diagram_min_aspect_ratio(),
            max_aspect_ratio: default_diagram_max_aspect_ratio(),
            min_width: default_diagram_min_side(),
            min_height: default_diagram_min_side(),
            max_page_fraction: default_max_page_fraction(),
            padding: default_diagram_padding(),
        }
    }
}

/// Table pass: long horizontal and vertical strokes isolated by opening
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Length of the horizontal structuring element (px).
    #[serde(default = "default_kernel_length")]
    pub horizontal_kernel: u32,

    /// Length of the vertical structuring element (px).
    #[serde(default = "default_kernel_length")]
    pub vertical_kernel: u32,

    #[serde(default = "default_table_min_area")]
    pub min_area: u64,

    #[serde(default = "default_table_min_width")]
    pub min_width: u32,

    #[serde(default = "default_table_min_height")]
    pub min_height: u32,

    /// Maximum share of stroke pixels inside an accepted box. Grids are
    /// sparse; a solid filled block is not a table.
    #[serde(default = "default_table_max_fill_ratio")]
    pub max_fill_ratio: f64,

    #[serde(default = "default_table_padding")]
    pub padding: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            horizontal_kernel: default_kernel_length(),
            vertical_kernel: default_kernel_length(),
            min_area: default_table_min_area(),
            min_width: default_table_min_width(),
            min_height: default_table_min_height(),
            max_fill_ratio: default_table_max_fill_ratio(),
            padding: default_table_padding(),
        }
    }
}

/// Equation pass: Otsu threshold, short and wide single-line boxes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquationConfig {
    #[serde(default = "default_equation_min_area")]
    pub min_area: u64,

    #[serde(default = "default_equation_max_area")]
    pub max_area: u64,

    #[serde(default = "default_equation_min_aspect_ratio")]
    pub min_aspect_ratio: f64,

    #[serde(default = "default_equation_min_height")]
    pub min_height: u32,

    #[serde(default = "default_equation_max_height")]
    pub max_height: u32,

    #[serde(default = "default_equation_min_width")]
    pub min_width: u32,

    #[serde(default = "default_equation_padding")]
    pub padding: u32,
}

impl Default for EquationConfig {
    fn default() -> Self {
        Self {
            min_area: default_equation_min_area(),
            max_area: default_equation_max_area(),
            min_aspect_ratio: default_equation_min_aspect_ratio(),
            min_height: default_equation_min_height(),
            max_height: default_equation_max_height(),
            min_width: default_equation_min_width(),
            padding: default_equation_padding(),
        }
    }
}

/// How overlapping boxes of different content types are reconciled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Merge into one box typed after the larger input, ties broken by
    /// `type_priority`.
    #[default]
    LargerWins,
    /// Only merge boxes of the same type; differently typed overlaps survive
    /// side by side.
    KeepBoth,
}

/// Region merging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Boxes merge when their intersection exceeds this share of the smaller
    /// box's area.
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f64,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Tie-break order for equal-area conflicts, highest priority first.
    #[serde(default = "default_type_priority")]
    pub type_priority: Vec<ContentType>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            overlap_ratio: default_overlap_ratio(),
            conflict_policy: ConflictPolicy::default(),
            type_priority: default_type_priority(),
        }
    }
}

/// Lossless encodings available for crops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Png,
    Webp,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
        }
    }
}

/// Cropping and fallback selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropConfig {
    /// Fraction of the page width/height trimmed from each edge for the
    /// representative crop.
    #[serde(default = "default_fallback_margin")]
    pub fallback_margin: f64,

    #[serde(default)]
    pub format: OutputFormat,

    /// Crops wider than this are downscaled before encoding.
    #[serde(default)]
    pub max_output_width: Option<u32>,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            fallback_margin: default_fallback_margin(),
            format: OutputFormat::default(),
            max_output_width: None,
        }
    }
}

/// Reference matching scores and keywords
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Score for "page N" references naming the record's page.
    #[serde(default = "default_page_score")]
    pub page_score: u32,

    /// Score for figure/diagram references whose first number is the page.
    #[serde(default = "default_figure_score")]
    pub figure_score: u32,

    /// Score for substring matches against the record id or stored name.
    #[serde(default = "default_substring_score")]
    pub substring_score: u32,

    #[serde(default = "default_figure_keywords")]
    pub figure_keywords: Vec<String>,

    /// Require the number after "page" to be complete, so "page 12" no
    /// longer matches page 1. Off by default: "page N" is a plain substring.
    #[serde(default)]
    pub whole_page_numbers: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            page_score: default_page_score(),
            figure_score: default_figure_score(),
            substring_score: default_substring_score(),
            figure_keywords: default_figure_keywords(),
            whole_page_numbers: false,
        }
    }
}

/// Page-level execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrent_pages")]
    pub max_concurrent_pages: usize,

    /// Resolution the pixel thresholds above are tuned for.
    #[serde(default = "default_reference_dpi")]
    pub reference_dpi: u32,

    /// Rescale pixel thresholds for pages rendered at another resolution.
    #[serde(default = "default_scale_to_page_dpi")]
    pub scale_to_page_dpi: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pages: default_max_concurrent_pages(),
            reference_dpi: default_reference_dpi(),
            scale_to_page_dpi: default_scale_to_page_dpi(),
        }
    }
}

impl ExtractionConfig {
    /// Reject values the detectors cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if self.diagram.adaptive_block_size < 3 || self.diagram.adaptive_block_size % 2 == 0 {
            return invalid("diagram.adaptive_block_size must be an odd number >= 3");
        }
        if self.diagram.min_aspect_ratio > self.diagram.max_aspect_ratio {
            return invalid("diagram.min_aspect_ratio exceeds diagram.max_aspect_ratio");
        }
        if !(0.0..=1.0).contains(&self.diagram.max_page_fraction) {
            return invalid("diagram.max_page_fraction must be within [0, 1]");
        }
        if self.table.horizontal_kernel == 0 || self.table.vertical_kernel == 0 {
            return invalid("table kernels must be at least 1px long");
        }
        if self.equation.min_area > self.equation.max_area {
            return invalid("equation.min_area exceeds equation.max_area");
        }
        if self.equation.min_height > self.equation.max_height {
            return invalid("equation.min_height exceeds equation.max_height");
        }
        if self.merge.overlap_ratio <= 0.0 || self.merge.overlap_ratio > 1.0 {
            return invalid("merge.overlap_ratio must be within (0, 1]");
        }
        if !(0.0..0.5).contains(&self.crop.fallback_margin) {
            return invalid("crop.fallback_margin must be within [0, 0.5)");
        }
        if self.crop.max_output_width == Some(0) {
            return invalid("crop.max_output_width must be positive when set");
        }
        if self.pipeline.max_concurrent_pages == 0 {
            return invalid("pipeline.max_concurrent_pages must be positive");
        }
        if self.pipeline.reference_dpi == 0 {
            return invalid("pipeline.reference_dpi must be positive");
        }
        Ok(())
    }

    /// Re-derive pixel thresholds for a raster rendered at `dpi`.
    ///
    /// Lengths scale linearly with resolution and areas quadratically;
    /// ratios and scores are resolution independent.
    pub fn scaled_for_dpi(&self, dpi: u32) -> ExtractionConfig {
        if dpi == self.pipeline.reference_dpi || dpi == 0 || self.pipeline.reference_dpi == 0 {
            return self.clone();
        }
        let factor = dpi as f64 / self.pipeline.reference_dpi as f64;
        let length = |value: u32| ((value as f64 * factor).round() as u32).max(1);
        let area = |value: u64| (value as f64 * factor * factor).round() as u64;

        let mut scaled = self.clone();

        let block = length(self.diagram.adaptive_block_size).max(3);
        scaled.diagram.adaptive_block_size = if block % 2 == 0 { block + 1 } else { block };
        scaled.diagram.min_area = area(self.diagram.min_area);
        scaled.diagram.min_width = length(self.diagram.min_width);
        scaled.diagram.min_height = length(self.diagram.min_height);
        scaled.diagram.padding = length(self.diagram.padding);

        scaled.table.horizontal_kernel = length(self.table.horizontal_kernel);
        scaled.table.vertical_kernel = length(self.table.vertical_kernel);
        scaled.table.min_area = area(self.table.min_area);
        scaled.table.min_width = length(self.table.min_width);
        scaled.table.min_height = length(self.table.min_height);
        scaled.table.padding = length(self.table.padding);

        scaled.equation.min_area = area(self.equation.min_area);
        scaled.equation.max_area = area(self.equation.max_area);
        scaled.equation.min_height = length(self.equation.min_height);
        scaled.equation.max_height = length(self.equation.max_height);
        scaled.equation.min_width = length(self.equation.min_width);
        scaled.equation.padding = length(self.equation.padding);

        scaled.pipeline.reference_dpi = dpi;
        scaled
    }
}

// ==================== Default Value Functions ====================

fn default_adaptive_block_size() -> u32 {
    11
}

fn default_adaptive_offset() -> f32 {
    2.0
}

fn default_diagram_min_area() -> u64 {
    15_000
}

fn default_diagram_min_aspect_ratio() -> f64 {
    0.2
}

fn default_diagram_max_aspect_ratio() -> f64 {
    8.0
}

fn default_diagram_min_side() -> u32 {
    100
}

fn default_max_page_fraction() -> f64 {
    0.9
}

fn default_diagram_padding() -> u32 {
    15
}

fn default_kernel_length() -> u32 {
    40
}

fn default_table_min_area() -> u64 {
    15_000
}

fn default_table_min_width() -> u32 {
    150
}

fn default_table_min_height() -> u32 {
    80
}

fn default_table_max_fill_ratio() -> f64 {
    0.6
}

fn default_table_padding() -> u32 {
    15
}

fn default_equation_min_area() -> u64 {
    3_000
}

fn default_equation_max_area() -> u64 {
    30_000
}

fn default_equation_min_aspect_ratio() -> f64 {
    1.5
}

fn default_equation_min_height() -> u32 {
    25
}

fn default_equation_max_height() -> u32 {
    80
}

fn default_equation_min_width() -> u32 {
    80
}

fn default_equation_padding() -> u32 {
    8
}

fn default_overlap_ratio() -> f64 {
    0.3
}

fn default_type_priority() -> Vec<ContentType> {
    vec![ContentType::Table, ContentType::Diagram, ContentType::Equation]
}

fn default_fallback_margin() -> f64 {
    0.1
}

fn default_page_score() -> u32 {
    100
}

fn default_figure_score() -> u32 {
    80
}

fn default_substring_score() -> u32 {
    60
}

fn default_figure_keywords() -> Vec<String> {
    ["figure", "fig", "diagram", "image"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_concurrent_pages() -> usize {
    4
}

fn default_reference_dpi() -> u32 {
    crate::raster::DEFAULT_DPI
}

fn default_scale_to_page_dpi() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExtractionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.diagram.min_area, 15_000);
        assert_eq!(config.merge.overlap_ratio, 0.3);
        assert_eq!(config.matching.page_score, 100);
        assert!(!config.matching.whole_page_numbers);
        assert_eq!(config.crop.format, OutputFormat::Png);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: ExtractionConfig =
            serde_json::from_str(r#"{"diagram": {"padding": 20}, "merge": {"conflict_policy": "keep_both"}}"#)
                .unwrap();

        assert_eq!(config.diagram.padding, 20);
        assert_eq!(config.diagram.min_width, 100);
        assert_eq!(config.merge.conflict_policy, ConflictPolicy::KeepBoth);
        assert_eq!(config.table, TableConfig::default());
    }

    #[test]
    fn test_validate_rejects_even_block_size() {
        let mut config = ExtractionConfig::default();
        config.diagram.adaptive_block_size = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_bands() {
        let mut config = ExtractionConfig::default();
        config.equation.min_height = 90;
        assert!(config.validate().is_err());

        let mut config = ExtractionConfig::default();
        config.crop.fallback_margin = 0.5;
        assert!(config.validate().is_err());

        let mut config = ExtractionConfig::default();
        config.merge.overlap_ratio = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scaled_for_dpi_halves_lengths_and_quarters_areas() {
        let config = ExtractionConfig::default();
        let scaled = config.scaled_for_dpi(150);

        assert_eq!(scaled.diagram.min_width, 50);
        assert_eq!(scaled.diagram.min_area, 3_750);
        assert_eq!(scaled.table.horizontal_kernel, 20);
        assert_eq!(scaled.equation.max_area, 7_500);
        // Block size stays odd
        assert_eq!(scaled.diagram.adaptive_block_size % 2, 1);
        // Ratios untouched
        assert_eq!(scaled.diagram.max_aspect_ratio, 8.0);
        assert_eq!(scaled.pipeline.reference_dpi, 150);
        assert!(scaled.validate().is_ok());
    }

    #[test]
    fn test_scaled_for_reference_dpi_is_identity() {
        let config = ExtractionConfig::default();
        assert_eq!(config.scaled_for_dpi(300), config);
    }
}
