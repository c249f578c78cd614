//! Locates diagrams, tables and equations on rasterized document pages,
//! crops them into content records and links textual references such as
//! "Figure 2.1" to the records they mean.

pub mod config;
pub mod crop;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod hash;
pub mod matching;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod raster;

pub use config::ExtractionConfig;
pub use crop::{ContentRecord, IdNamespace};
pub use error::{AppError, AppResult};
pub use geometry::{BoundingBox, CandidateRegion, ContentType};
pub use matching::{MatchResult, ReferenceMatcher, ReferenceToken};
pub use pipeline::{DocumentExtraction, Extractor, PageInput};
pub use raster::PageRaster;
