//! Document-level extraction: detect, merge and crop every page, then hand
//! the finished records to reference matching.
//!
//! Pages are independent, so each one runs on the blocking pool with its own
//! raster. Matching needs every page's records and therefore runs once,
//! after [`Extractor::extract_document`] has returned.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::crop::{ContentRecord, CropDiagnostic, IdNamespace, RegionCropper};
use crate::detect::RegionDetector;
use crate::error::ExtractionError;
use crate::geometry::{CandidateRegion, ContentType};
use crate::matching::{MatchResult, ReferenceMatcher, ReferenceToken};
use crate::merge::RegionMerger;
use crate::raster::PageRaster;

/// One page handed to the pipeline. Page numbers are 1-based and unique
/// within a document.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub page: u32,
    pub raster: PageRaster,
}

impl PageInput {
    pub fn new(page: u32, raster: PageRaster) -> Self {
        Self { page, raster }
    }
}

/// Everything published for a successfully processed page.
#[derive(Debug)]
pub struct PageExtraction {
    pub page: u32,
    /// Candidates proposed by the detector passes before merging.
    pub candidate_count: usize,
    /// Canonical regions after merging.
    pub regions: Vec<CandidateRegion>,
    pub records: Vec<ContentRecord>,
    pub diagnostics: Vec<CropDiagnostic>,
    pub used_fallback: bool,
}

/// A page that published nothing.
#[derive(Debug)]
pub struct PageFailure {
    pub page: u32,
    pub error: ExtractionError,
}

/// Result of extracting a whole document, pages in ascending order.
#[derive(Debug, Default)]
pub struct DocumentExtraction {
    pub pages: Vec<PageExtraction>,
    pub failures: Vec<PageFailure>,
}

impl DocumentExtraction {
    /// All records, in page order and crop order within a page.
    pub fn records(&self) -> impl Iterator<Item = &ContentRecord> {
        self.pages.iter().flat_map(|page| page.records.iter())
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Record pages that failed outside the pipeline, such as page images
    /// that could not be decoded.
    pub fn add_failures(&mut self, failures: impl IntoIterator<Item = PageFailure>) {
        self.failures.extend(failures);
        self.failures.sort_by_key(|failure| failure.page);
    }

    fn publish(&mut self, page: u32, outcome: Result<PageExtraction, ExtractionError>) {
        match outcome {
            Ok(extraction) => {
                debug!(
                    page,
                    candidates = extraction.candidate_count,
                    regions = extraction.regions.len(),
                    records = extraction.records.len(),
                    "Page extracted"
                );
                self.pages.push(extraction);
            }
            Err(error) => {
                if matches!(error, ExtractionError::Cancelled { .. }) {
                    debug!(page, "Page cancelled");
                } else {
                    warn!(page, error = %error, "Page extraction failed");
                }
                self.failures.push(PageFailure { page, error });
            }
        }
    }

    pub fn summary(&self) -> ExtractionSummary {
        let mut summary = ExtractionSummary {
            pages: self.pages.len() + self.failures.len(),
            ..ExtractionSummary::default()
        };

        for page in &self.pages {
            for record in &page.records {
                summary.records += 1;
                summary.total_bytes += record.byte_size;
                *summary.records_by_type.entry(record.content_type).or_insert(0) += 1;
            }
            summary.diagnostics += page.diagnostics.len();
            if page.used_fallback {
                summary.fallback_pages.push(page.page);
            }
        }
        for failure in &self.failures {
            match failure.error {
                ExtractionError::Cancelled { .. } => summary.cancelled_pages.push(failure.page),
                _ => summary.failed_pages.push(failure.page),
            }
        }
        summary
    }
}

/// Counts describing a [`DocumentExtraction`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    pub pages: usize,
    pub records: usize,
    pub records_by_type: BTreeMap<ContentType, usize>,
    pub total_bytes: u64,
    pub diagnostics: usize,
    pub fallback_pages: Vec<u32>,
    pub failed_pages: Vec<u32>,
    pub cancelled_pages: Vec<u32>,
}

/// Runs detection, merging and cropping for the pages of one document.
///
/// Cheap to clone; clones share the configuration.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: Arc<ExtractionConfig>,
    namespace: IdNamespace,
}

impl Extractor {
    pub fn new(config: ExtractionConfig, namespace: IdNamespace) -> Self {
        Self {
            config: Arc::new(config),
            namespace,
        }
    }

    /// Process one page to completion.
    pub fn process_page(&self, page_number: u32, raster: &PageRaster) -> PageExtraction {
        let Ok(page) = self.run_stages::<Infallible>(page_number, raster, || Ok(()));
        page
    }

    /// Process one page, checking `cancel` between stages.
    ///
    /// A cancelled page returns [`ExtractionError::Cancelled`] and none of
    /// the work done so far.
    pub fn process_page_cancellable(
        &self,
        page_number: u32,
        raster: &PageRaster,
        cancel: &CancellationToken,
    ) -> Result<PageExtraction, ExtractionError> {
        self.run_stages(page_number, raster, || check_cancelled(cancel, page_number))
    }

    /// Extract every page, at most `max_concurrent_pages` at a time.
    ///
    /// A page that fails, panics or is cancelled lands in
    /// [`DocumentExtraction::failures`]; the remaining pages are unaffected.
    pub async fn extract_document(&self, pages: Vec<PageInput>, cancel: CancellationToken) -> DocumentExtraction {
        let max_concurrent = self.config.pipeline.max_concurrent_pages.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut tasks = JoinSet::new();

        info!(
            pages = pages.len(),
            max_concurrent,
            namespace = %self.namespace.as_str(),
            "Starting document extraction"
        );

        let mut task_pages = HashMap::new();
        for input in pages {
            let extractor = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let page = input.page;
            let handle = tasks.spawn(async move { (page, extractor.run_page_task(input, semaphore, cancel).await) });
            task_pages.insert(handle.id(), page);
        }

        let mut document = DocumentExtraction::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            record_joined(&mut document, &task_pages, joined);
        }

        document.pages.sort_by_key(|page| page.page);
        document.failures.sort_by_key(|failure| failure.page);

        let summary = document.summary();
        info!(
            pages = summary.pages,
            records = summary.records,
            fallback_pages = summary.fallback_pages.len(),
            failed_pages = summary.failed_pages.len(),
            cancelled_pages = summary.cancelled_pages.len(),
            "Document extraction complete"
        );
        document
    }

    /// Match reference tokens against every record of an extracted document.
    pub fn match_references(&self, tokens: &[ReferenceToken], document: &DocumentExtraction) -> MatchResult {
        ReferenceMatcher::new(&self.config.matching).match_references(tokens, document.records())
    }

    async fn run_page_task(
        self,
        input: PageInput,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Result<PageExtraction, ExtractionError> {
        let page = input.page;

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExtractionError::Cancelled { page }),
            permit = semaphore.acquire_owned() => permit.map_err(|e| ExtractionError::Worker {
                page,
                message: e.to_string(),
            })?,
        };

        tokio::task::spawn_blocking(move || self.process_page_cancellable(page, &input.raster, &cancel))
            .await
            .map_err(|e| ExtractionError::Worker {
                page,
                message: e.to_string(),
            })?
    }

    fn run_stages<E>(
        &self,
        page_number: u32,
        raster: &PageRaster,
        check: impl Fn() -> Result<(), E>,
    ) -> Result<PageExtraction, E> {
        check()?;
        let config = self.config_for(raster);
        let candidates = RegionDetector::new(&config).detect(raster, page_number);
        check()?;
        let regions = RegionMerger::new(&config.merge).merge(&candidates);
        check()?;
        let crops = RegionCropper::new(&config.crop, self.namespace.clone()).crop(raster, page_number, &regions);
        check()?;

        Ok(PageExtraction {
            page: page_number,
            candidate_count: candidates.len(),
            regions,
            records: crops.records,
            diagnostics: crops.diagnostics,
            used_fallback: crops.used_fallback,
        })
    }

    fn config_for(&self, raster: &PageRaster) -> Cow<'_, ExtractionConfig> {
        let reference_dpi = self.config.pipeline.reference_dpi;
        if self.config.pipeline.scale_to_page_dpi && raster.dpi() != reference_dpi {
            debug!(dpi = raster.dpi(), reference_dpi, "Scaling thresholds to page resolution");
            Cow::Owned(self.config.scaled_for_dpi(raster.dpi()))
        } else {
            Cow::Borrowed(self.config.as_ref())
        }
    }
}

type PageOutcome = (u32, Result<PageExtraction, ExtractionError>);

/// File a finished page task under its page, including tasks that panicked
/// or were aborted before producing an outcome.
fn record_joined(
    document: &mut DocumentExtraction,
    task_pages: &HashMap<Id, u32>,
    joined: Result<(Id, PageOutcome), JoinError>,
) {
    match joined {
        Ok((_, (page, outcome))) => document.publish(page, outcome),
        Err(error) => match task_pages.get(&error.id()) {
            Some(&page) => {
                let message = error.to_string();
                document.publish(page, Err(ExtractionError::Worker { page, message }));
            }
            None => warn!(error = %error, "Page task failed for an unknown page"),
        },
    }
}

fn check_cancelled(cancel: &CancellationToken, page: u32) -> Result<(), ExtractionError> {
    if cancel.is_cancelled() {
        Err(ExtractionError::Cancelled { page })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use crate::geometry::BoundingBox;
    use image::{GrayImage, Luma};

    fn blank_page() -> GrayImage {
        GrayImage::from_pixel(1000, 1400, Luma([255]))
    }

    fn fill(image: &mut GrayImage, x: u32, y: u32, w: u32, h: u32) {
        for py in y..y + h {
            for px in x..x + w {
                image.put_pixel(px, py, Luma([0]));
            }
        }
    }

    fn rectangle_page() -> PageRaster {
        let mut image = blank_page();
        fill(&mut image, 100, 100, 200, 150);
        PageRaster::from(image)
    }

    fn grid_page() -> PageRaster {
        let mut image = blank_page();
        for row in 0..5 {
            fill(&mut image, 100, 300 + row * 45, 502, 2);
        }
        for col in 0..6 {
            fill(&mut image, 100 + col * 100, 300, 2, 182);
        }
        PageRaster::from(image)
    }

    fn extractor() -> Extractor {
        Extractor::new(ExtractionConfig::default(), IdNamespace::new("exam"))
    }

    fn assert_valid(bounds: &BoundingBox, raster: &PageRaster) {
        assert!(bounds.width > 0 && bounds.height > 0);
        assert!(bounds.fits_within(raster.width(), raster.height()), "{bounds} escapes page");
    }

    #[test]
    fn test_single_rectangle_yields_one_diagram() {
        let raster = rectangle_page();
        let page = extractor().process_page(1, &raster);

        assert_eq!(page.records.len(), 1);
        let record = &page.records[0];
        assert_eq!(record.content_type, ContentType::Diagram);
        assert_eq!(record.bounds, BoundingBox::new(85, 85, 230, 180).unwrap());
        assert_eq!(record.id, "exam-1-1");
        assert!(!page.used_fallback);
    }

    #[test]
    fn test_grid_yields_one_table() {
        let raster = grid_page();
        let page = extractor().process_page(3, &raster);

        let tables: Vec<_> = page
            .records
            .iter()
            .filter(|r| r.content_type == ContentType::Table)
            .collect();
        assert_eq!(tables.len(), 1);
        assert_eq!(page.regions.len(), 1);
        assert!(page.candidate_count >= page.regions.len());
    }

    #[test]
    fn test_blank_page_uses_fallback() {
        let raster = PageRaster::from(blank_page());
        let page = extractor().process_page(2, &raster);

        assert!(page.used_fallback);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].content_type, ContentType::Representative);
        assert_eq!(page.records[0].name, "exam_page_2_content_1.png");
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let raster = grid_page();
        let first = extractor().process_page(1, &raster);
        let second = extractor().process_page(1, &raster);

        assert_eq!(first.records, second.records);
        assert_eq!(first.regions, second.regions);

        let merger = RegionMerger::new(&ExtractionConfig::default().merge);
        assert_eq!(merger.merge(&first.regions), first.regions);
    }

    #[test]
    fn test_thresholds_follow_page_dpi() {
        // 150 DPI halves lengths and quarters areas; the rectangle still passes
        let mut image = GrayImage::from_pixel(500, 700, Luma([255]));
        fill(&mut image, 50, 50, 100, 75);
        let raster = PageRaster::new(image::DynamicImage::ImageLuma8(image), 150);

        let page = extractor().process_page(1, &raster);
        assert!(!page.used_fallback);
        assert_eq!(page.records[0].content_type, ContentType::Diagram);

        let fixed = Extractor::new(
            ExtractionConfig {
                pipeline: crate::config::PipelineConfig {
                    scale_to_page_dpi: false,
                    ..Default::default()
                },
                ..Default::default()
            },
            IdNamespace::new("exam"),
        );
        assert!(fixed.process_page(1, &raster).used_fallback);
    }

    #[test]
    fn test_cancelled_before_start_publishes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = extractor().process_page_cancellable(1, &rectangle_page(), &cancel);
        assert!(matches!(result, Err(ExtractionError::Cancelled { page: 1 })));
    }

    #[test]
    fn test_cancellation_between_stages_publishes_nothing() {
        let raster = rectangle_page();
        let extractor = extractor();

        // Checks run before detection, after detection, after merging and
        // after cropping; fire the token at each of them in turn
        for stage in 1..=4 {
            let cancel = CancellationToken::new();
            let checks = Cell::new(0);
            let result = extractor.run_stages(1, &raster, || {
                checks.set(checks.get() + 1);
                if checks.get() == stage {
                    cancel.cancel();
                }
                check_cancelled(&cancel, 1)
            });

            assert!(
                matches!(result, Err(ExtractionError::Cancelled { page: 1 })),
                "stage {stage} still published"
            );
            assert_eq!(checks.get(), stage);
        }

        let cancel = CancellationToken::new();
        let page = extractor.process_page_cancellable(1, &raster, &cancel).unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn test_panicked_page_task_is_reported_as_failure() {
        let mut tasks: JoinSet<PageOutcome> = JoinSet::new();
        let mut task_pages = HashMap::new();
        let handle = tasks.spawn(async {
            let page = 7;
            assert!(page == 0, "worker crashed");
            (page, Err(ExtractionError::Cancelled { page }))
        });
        task_pages.insert(handle.id(), 7);

        let mut document = DocumentExtraction::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            record_joined(&mut document, &task_pages, joined);
        }

        assert!(document.pages.is_empty());
        assert_eq!(document.failures.len(), 1);
        assert!(matches!(
            document.failures[0].error,
            ExtractionError::Worker { page: 7, .. }
        ));
        let summary = document.summary();
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.failed_pages, [7]);
    }

    #[test]
    fn test_add_failures_keeps_page_order() {
        let mut document = DocumentExtraction::default();
        document.failures.push(PageFailure {
            page: 4,
            error: ExtractionError::Cancelled { page: 4 },
        });
        document.add_failures([PageFailure {
            page: 2,
            error: ExtractionError::Worker {
                page: 2,
                message: "unreadable".to_string(),
            },
        }]);

        let order: Vec<u32> = document.failures.iter().map(|f| f.page).collect();
        assert_eq!(order, [2, 4]);
        assert!(!document.is_complete());
        assert_eq!(document.summary().failed_pages, [2]);
        assert_eq!(document.summary().cancelled_pages, [4]);
    }

    #[tokio::test]
    async fn test_extract_document_keeps_page_order_and_coverage() {
        let pages = vec![
            PageInput::new(1, grid_page()),
            PageInput::new(2, PageRaster::from(blank_page())),
            PageInput::new(3, rectangle_page()),
            PageInput::new(4, grid_page()),
        ];
        let rasters: Vec<PageRaster> = pages.iter().map(|p| p.raster.clone()).collect();

        let document = extractor()
            .extract_document(pages, CancellationToken::new())
            .await;

        assert!(document.is_complete());
        let order: Vec<u32> = document.pages.iter().map(|p| p.page).collect();
        assert_eq!(order, [1, 2, 3, 4]);

        for (page, raster) in document.pages.iter().zip(&rasters) {
            assert!(!page.records.is_empty(), "page {} has no records", page.page);
            for record in &page.records {
                assert_eq!(record.page, page.page);
                assert_valid(&record.bounds, raster);
            }
            for region in &page.regions {
                assert_valid(&region.bounds, raster);
            }
        }

        let ids: std::collections::HashSet<&str> = document.records().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), document.records().count());

        let summary = document.summary();
        assert_eq!(summary.pages, 4);
        assert_eq!(summary.fallback_pages, [2]);
        assert_eq!(summary.records_by_type[&ContentType::Table], 2);
        assert_eq!(summary.records_by_type[&ContentType::Diagram], 1);
        assert_eq!(summary.records_by_type[&ContentType::Representative], 1);
        assert!(summary.failed_pages.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_document_publishes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pages = vec![
            PageInput::new(1, rectangle_page()),
            PageInput::new(2, grid_page()),
        ];

        let document = extractor().extract_document(pages, cancel).await;

        assert!(document.pages.is_empty());
        assert_eq!(document.records().count(), 0);
        assert_eq!(document.failures.len(), 2);
        assert!(
            document
                .failures
                .iter()
                .all(|f| matches!(f.error, ExtractionError::Cancelled { .. }))
        );
        assert_eq!(document.summary().cancelled_pages, [1, 2]);
    }

    #[tokio::test]
    async fn test_degenerate_page_does_not_abort_document() {
        let pages = vec![
            PageInput::new(1, PageRaster::from(GrayImage::new(0, 0))),
            PageInput::new(2, rectangle_page()),
        ];

        let document = extractor()
            .extract_document(pages, CancellationToken::new())
            .await;

        assert_eq!(document.pages.len(), 2);
        assert!(document.pages[0].records.is_empty());
        assert!(matches!(
            document.pages[0].diagnostics[0].error,
            ExtractionError::DegeneratePage { page: 1, .. }
        ));
        assert_eq!(document.pages[1].records.len(), 1);
    }

    #[tokio::test]
    async fn test_match_references_across_pages() {
        let pages = vec![
            PageInput::new(1, PageRaster::from(blank_page())),
            PageInput::new(2, rectangle_page()),
        ];
        let extractor = extractor();
        let document = extractor
            .extract_document(pages, CancellationToken::new())
            .await;

        let tokens = vec![ReferenceToken::new("Figure 2.1"), ReferenceToken::new("Table 9")];
        let result = extractor.match_references(&tokens, &document);

        assert_eq!(result.content_for(&tokens[0]), Some("exam-2-1"));
        assert_eq!(result.unmatched_tokens, [tokens[1].clone()]);
        assert_eq!(result.unmatched_content, ["exam-1-1"]);
    }
}
