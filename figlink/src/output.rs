//! Reading batch inputs from disk and handing results to storage.
//!
//! An output directory holds one image file per record, named after the
//! record's stored name, next to two manifests:
//!
//! - `content.json`: extraction summary, record metadata and page failures
//! - `matches.json`: token matches, unmatched tokens/content and owner links

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crop::ContentRecord;
use crate::error::{ExtractionError, OutputError, format_error_chain};
use crate::matching::{MatchResult, ReferenceToken};
use crate::pipeline::{DocumentExtraction, ExtractionSummary, PageFailure, PageInput};
use crate::raster::PageRaster;

pub const CONTENT_MANIFEST: &str = "content.json";
pub const MATCH_MANIFEST: &str = "matches.json";

const PAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Page images read from a directory.
#[derive(Debug, Default)]
pub struct LoadedPages {
    pub pages: Vec<PageInput>,
    /// Files that matched a page extension but could not be decoded.
    pub failures: Vec<PageFailure>,
}

/// Load every page image in `dir`, ordered by file name and numbered from 1.
///
/// A file that fails to decode keeps its page number and is reported in
/// [`LoadedPages::failures`]; the remaining pages still load.
pub fn load_pages(dir: &Path, dpi: u32) -> Result<LoadedPages, OutputError> {
    let io_error = |source| OutputError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && is_page_image(&path) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut loaded = LoadedPages::default();
    for (page, path) in (1u32..).zip(paths) {
        match image::open(&path) {
            Ok(image) => {
                debug!(page, path = %path.display(), "Loaded page image");
                loaded.pages.push(PageInput::new(page, PageRaster::new(image, dpi)));
            }
            Err(source) => {
                let error = ExtractionError::UnreadablePage { page, path, source };
                warn!(page, error = %format_error_chain(&error), "Skipping unreadable page image");
                loaded.failures.push(PageFailure { page, error });
            }
        }
    }

    info!(
        dir = %dir.display(),
        pages = loaded.pages.len(),
        unreadable = loaded.failures.len(),
        "Loaded page images"
    );
    Ok(loaded)
}

fn is_page_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// A reference entry as written by hand: either bare text or a token object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReferenceEntry {
    Text(String),
    Token(ReferenceToken),
}

/// Read reference tokens from a JSON array of strings and/or
/// `{"text": ..., "owner": ...}` objects.
pub fn load_references(path: &Path) -> Result<Vec<ReferenceToken>, OutputError> {
    let content = std::fs::read_to_string(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let entries: Vec<ReferenceEntry> =
        serde_json::from_str(&content).map_err(|source| OutputError::Serialization {
            path: path.to_path_buf(),
            source,
        })?;

    let tokens: Vec<ReferenceToken> = entries
        .into_iter()
        .map(|entry| match entry {
            ReferenceEntry::Text(text) => ReferenceToken::new(text),
            ReferenceEntry::Token(token) => token,
        })
        .collect();
    info!(path = %path.display(), tokens = tokens.len(), "Loaded reference tokens");
    Ok(tokens)
}

#[derive(Debug, Serialize)]
struct ContentManifest<'a> {
    summary: ExtractionSummary,
    records: Vec<&'a ContentRecord>,
    failures: Vec<FailureEntry>,
}

#[derive(Debug, Serialize)]
struct FailureEntry {
    page: u32,
    error: String,
}

#[derive(Debug, Serialize)]
struct MatchManifest<'a> {
    #[serde(flatten)]
    result: &'a MatchResult,
    links_by_owner: BTreeMap<String, Vec<String>>,
}

/// Paths written by [`write_outputs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenOutputs {
    pub images: Vec<PathBuf>,
    pub content_manifest: PathBuf,
    pub match_manifest: PathBuf,
}

/// Write every record image plus both manifests into `dir`.
///
/// Existing files with the same names are overwritten, so re-running with the
/// same namespace replaces an earlier run.
pub fn write_outputs(
    dir: &Path,
    document: &DocumentExtraction,
    matches: &MatchResult,
) -> Result<WrittenOutputs, OutputError> {
    std::fs::create_dir_all(dir).map_err(|source| OutputError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut images = Vec::new();
    for record in document.records() {
        let path = dir.join(&record.name);
        std::fs::write(&path, &record.image_bytes).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        images.push(path);
    }

    let content_manifest = dir.join(CONTENT_MANIFEST);
    write_json(
        &content_manifest,
        &ContentManifest {
            summary: document.summary(),
            records: document.records().collect(),
            failures: document
                .failures
                .iter()
                .map(|failure| FailureEntry {
                    page: failure.page,
                    error: format_error_chain(&failure.error),
                })
                .collect(),
        },
    )?;

    let match_manifest = dir.join(MATCH_MANIFEST);
    write_json(
        &match_manifest,
        &MatchManifest {
            result: matches,
            links_by_owner: matches.links_by_owner(),
        },
    )?;

    info!(
        dir = %dir.display(),
        images = images.len(),
        matches = matches.matches.len(),
        "Wrote extraction outputs"
    );

    Ok(WrittenOutputs {
        images,
        content_manifest,
        match_manifest,
    })
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), OutputError> {
    let io_error = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| OutputError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_error)
}
