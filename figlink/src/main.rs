use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use figlink::config::{load_config, load_config_from};
use figlink::error::format_error_chain;
use figlink::output::{load_pages, load_references, write_outputs};
use figlink::raster::DEFAULT_DPI;
use figlink::{AppResult, Extractor, IdNamespace};

/// Extract diagrams, tables and equations from rendered pages and link
/// textual references to them.
#[derive(Parser, Debug)]
#[command(name = "figlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of page images (png, jpg, webp), one file per page in name order
    #[arg(long)]
    pages: PathBuf,

    /// JSON array of reference tokens
    #[arg(long)]
    references: PathBuf,

    /// Directory for cropped images and manifests
    #[arg(long)]
    output: PathBuf,

    /// Configuration file; defaults to ./figlink.{toml,yaml,json} if present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prefix for record ids and stored file names
    #[arg(long, default_value = "doc")]
    namespace: String,

    /// Resolution the page images were rendered at
    #[arg(long, default_value_t = DEFAULT_DPI)]
    dpi: u32,
}

#[tokio::main]
async fn main() {
    init_logging();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %format_error_chain(&e), "figlink failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> AppResult<()> {
    info!("Starting figlink v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    let loaded = load_pages(&args.pages, args.dpi)?;
    let tokens = load_references(&args.references)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling outstanding pages");
            ctrl_c.cancel();
        }
    });

    let extractor = Extractor::new(config, IdNamespace::new(args.namespace));
    let mut document = extractor.extract_document(loaded.pages, cancel).await;
    document.add_failures(loaded.failures);
    for failure in &document.failures {
        warn!(page = failure.page, error = %format_error_chain(&failure.error), "Page not extracted");
    }

    let matches = extractor.match_references(&tokens, &document);
    let written = write_outputs(&args.output, &document, &matches)?;

    let summary = document.summary();
    info!(
        records = summary.records,
        bytes = summary.total_bytes,
        matched = matches.matches.len(),
        unmatched_tokens = matches.unmatched_tokens.len(),
        unmatched_content = matches.unmatched_content.len(),
        manifest = %written.content_manifest.display(),
        "Done"
    );
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("figlink=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
