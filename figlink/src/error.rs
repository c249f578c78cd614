use std::path::PathBuf;

use thiserror::Error;

use crate::geometry::BoundingBox;

/// Top-level error type for the batch driver
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error")]
    Config(#[from] ConfigError),

    #[error("Output failed")]
    Output(#[from] OutputError),
}

/// Page and region processing errors
///
/// None of these abort a document: region faults are reported next to the
/// surviving records and page faults next to the surviving pages.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Page {page} is degenerate ({width}x{height})")]
    DegeneratePage { page: u32, width: u32, height: u32 },

    #[error("Region {bounds} on page {page} is empty after clipping")]
    EmptyCrop { page: u32, bounds: BoundingBox },

    #[error("Failed to encode crop {bounds} on page {page}")]
    Encode {
        page: u32,
        bounds: BoundingBox,
        #[source]
        source: image::ImageError,
    },

    #[error("Page {page} could not be decoded from {}", path.display())]
    UnreadablePage {
        page: u32,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Processing of page {page} was cancelled")]
    Cancelled { page: u32 },

    #[error("Worker for page {page} failed: {message}")]
    Worker { page: u32, message: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors reading inputs or persisting results
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed for {}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for the batch driver
pub type AppResult<T> = Result<T, AppError>;

/// Render an error and all of its sources on one line.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_chain_includes_sources() {
        let error = OutputError::Io {
            path: PathBuf::from("out/content.json"),
            source: std::io::Error::other("disk full"),
        };

        assert_eq!(
            format_error_chain(&error),
            "IO error at out/content.json: disk full"
        );
    }

    #[test]
    fn test_empty_crop_message_names_region() {
        let error = ExtractionError::EmptyCrop {
            page: 3,
            bounds: BoundingBox::new(10, 20, 5, 5).unwrap(),
        };

        assert_eq!(
            error.to_string(),
            "Region (10,20)-(15,25) on page 3 is empty after clipping"
        );
    }

    #[test]
    fn test_unreadable_page_message_names_file() {
        let error = ExtractionError::UnreadablePage {
            page: 2,
            path: PathBuf::from("pages/02.png"),
            source: image::ImageError::IoError(std::io::Error::other("truncated")),
        };

        assert_eq!(error.to_string(), "Page 2 could not be decoded from pages/02.png");
        assert!(std::error::Error::source(&error).is_some());
    }
}
