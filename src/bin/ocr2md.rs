//! CLI binary for ocr2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, wires a progress bar to the progress-callback trait,
//! and prints results.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use ocr2md::{
    inspect, CacheStore, ConversionConfig, ConversionProgressCallback, Converter, PageSeparator,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ocr2md",
    version,
    about = "Convert PDF documents to Markdown with selective OCR",
    long_about = "Converts a PDF to Markdown. Pages with a usable text layer are extracted \
directly; scanned pages go through tesseract. Finished conversions are cached \
by content fingerprint when --cache-dir is set."
)]
struct Cli {
    /// Input PDF file.
    input: PathBuf,

    /// Write Markdown here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Tesseract language code ("eng", "spa", "eng+spa", …).
    #[arg(short, long, default_value = "eng", env = "OCR2MD_LANG")]
    lang: String,

    /// Rasterisation DPI for OCR'd pages.
    #[arg(long, default_value_t = 300)]
    dpi: u32,

    /// Pages processed concurrently.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Run the LLM refinement pass (needs OPENAI_API_KEY or GEMINI_API_KEY).
    #[arg(long)]
    refine: bool,

    /// Refinement provider: openai or gemini. Auto-detected when omitted.
    #[arg(long)]
    provider: Option<String>,

    /// Refinement model identifier.
    #[arg(long)]
    model: Option<String>,

    /// Password for encrypted PDFs.
    #[arg(long)]
    password: Option<String>,

    /// Disable table detection.
    #[arg(long)]
    no_tables: bool,

    /// Separator between pages in the output.
    #[arg(long, value_enum, default_value_t = SeparatorArg::None)]
    separator: SeparatorArg,

    /// Prepend YAML front matter with document metadata.
    #[arg(long)]
    metadata: bool,

    /// Cache directory; omit for no persistence across runs.
    #[arg(long, env = "OCR2MD_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Ignore the cache even when --cache-dir is set.
    #[arg(long)]
    no_cache: bool,

    /// Print cache/conversion statistics to stderr when done.
    #[arg(long)]
    stats: bool,

    /// Print document metadata and exit without converting.
    #[arg(long)]
    inspect: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SeparatorArg {
    None,
    Rule,
    Comment,
}

impl From<SeparatorArg> for PageSeparator {
    fn from(value: SeparatorArg) -> Self {
        match value {
            SeparatorArg::None => PageSeparator::None,
            SeparatorArg::Rule => PageSeparator::HorizontalRule,
            SeparatorArg::Comment => PageSeparator::Comment,
        }
    }
}

// ── Progress bar callback ────────────────────────────────────────────────

/// Terminal progress callback rendering a live bar via [indicatif].
/// Handles out-of-order page completion (pages run concurrently).
struct CliProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{bar:40.green/238}] {pos:>3}/{len} pages  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl ConversionProgressCallback for CliProgress {
    fn on_conversion_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
    }

    fn on_page_complete(&self, _page: usize, _total: usize, _len: usize) {
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, _total: usize, error: String) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!("page {page}: {error}"));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, _total: usize, succeeded: usize) {
        let errors = self.errors.load(Ordering::SeqCst);
        if errors > 0 {
            self.bar
                .finish_with_message(format!("{succeeded} ok, {errors} degraded"));
        } else {
            self.bar.finish_with_message("done");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.inspect {
        let meta = inspect(&cli.input).await.context("inspect failed")?;
        println!("{}", serde_json::to_string_pretty(&meta)?);
        return Ok(());
    }

    let progress = CliProgress::new();
    let mut builder = ConversionConfig::builder()
        .ocr_language(&cli.lang)
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .detect_tables(!cli.no_tables)
        .refine(cli.refine)
        .page_separator(cli.separator.into())
        .include_metadata(cli.metadata)
        .progress_callback(progress.clone());
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(password) = &cli.password {
        builder = builder.password(password);
    }
    let config = builder.build().context("invalid configuration")?;

    let converter = match (&cli.cache_dir, cli.no_cache) {
        (Some(dir), false) => {
            Converter::with_cache(CacheStore::open(dir).context("opening cache")?)
        }
        _ => Converter::new(),
    };

    let result = match &cli.output {
        Some(path) => converter
            .convert_to_file(&cli.input, path, &config)
            .await
            .with_context(|| format!("converting {}", cli.input.display()))?,
        None => {
            let result = converter
                .convert(&cli.input, &config)
                .await
                .with_context(|| format!("converting {}", cli.input.display()))?;
            println!("{}", result.markdown);
            result
        }
    };

    if cli.stats {
        let cache = converter.cache_stats();
        eprintln!(
            "pages: {} total / {} direct / {} ocr / {} hybrid / {} failed",
            result.stats.total_pages,
            result.stats.direct_pages,
            result.stats.ocr_pages,
            result.stats.hybrid_pages,
            result.stats.failed_pages,
        );
        eprintln!("tables: {}", result.stats.tables);
        eprintln!(
            "time: {}ms total, {}ms ocr, {}ms refine",
            result.stats.total_duration_ms,
            result.stats.ocr_duration_ms,
            result.stats.refine_duration_ms,
        );
        eprintln!(
            "cache: {} hits / {} misses / {} entries{}",
            cache.hits,
            cache.misses,
            cache.entries,
            if result.from_cache() { " (served from cache)" } else { "" },
        );
    }

    Ok(())
}
