//! Conversion entry points: the `Converter` and its orchestration.
//!
//! One conversion is a straight line with a short-circuit at the front:
//!
//! ```text
//! bytes ──▶ fingerprint ──▶ cache lookup ──▶ (hit: done)
//!                              │ miss
//!                              ▼
//!            classify/extract/refine per page (concurrent)
//!                              │ join
//!                              ▼
//!                      assemble by page index
//!                              │
//!                              ▼
//!                   cache write-through ──▶ result
//! ```
//!
//! The cache write happens only after the whole document assembled; a
//! cancelled or failed conversion never stores anything partial. Per-page
//! degradations (OCR down, refinement rejected) ride along in provenance —
//! only document-level input problems abort with an error.

use crate::cache::{CacheStats, CacheStore};
use crate::config::ConversionConfig;
use crate::error::Ocr2MdError;
use crate::fingerprint::{fingerprint, DocumentFingerprint};
use crate::ocr::{OcrEngine, TesseractCli};
use crate::output::{ConversionResult, DocumentMetadata};
use crate::pipeline::assemble::{assemble, RefinedPage};
use crate::pipeline::extract::extract_page;
use crate::pipeline::refine::refine_page;
use crate::providers::{self, RefinementProvider};
use crate::source::{PageSource, PdfiumSource};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The produced interface of the library: convert documents, report cache
/// statistics.
///
/// A `Converter` owns the conversion cache and the OCR engine; both are
/// chosen once at composition time. The PDF source and (optionally) the
/// refinement provider arrive per call, because they depend on the input
/// and the config respectively.
pub struct Converter {
    cache: CacheStore,
    ocr: Arc<dyn OcrEngine>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    /// In-memory cache, tesseract CLI engine. Good for one-shot runs.
    pub fn new() -> Self {
        Self {
            cache: CacheStore::in_memory(),
            ocr: Arc::new(TesseractCli::default()),
        }
    }

    /// Use an explicit cache store (e.g. file-backed via [`CacheStore::open`]).
    pub fn with_cache(cache: CacheStore) -> Self {
        Self {
            cache,
            ocr: Arc::new(TesseractCli::default()),
        }
    }

    /// Full composition control: cache store and OCR engine.
    pub fn with_parts(cache: CacheStore, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { cache, ocr }
    }

    /// Convert a PDF file on disk to Markdown.
    ///
    /// This is the primary entry point. Returns `Ok` even when some pages
    /// degraded — check `result.stats.failed_pages` and the per-page
    /// provenance. Fails only for document-level problems (missing file,
    /// not a PDF, wrong password).
    pub async fn convert(
        &self,
        path: impl AsRef<Path>,
        config: &ConversionConfig,
    ) -> Result<ConversionResult, Ocr2MdError> {
        let path = path.as_ref();
        info!("Starting conversion: {}", path.display());
        let bytes = read_pdf_bytes(path).await?;
        self.convert_bytes(&bytes, config).await
    }

    /// Convert PDF bytes held in memory.
    pub async fn convert_bytes(
        &self,
        bytes: &[u8],
        config: &ConversionConfig,
    ) -> Result<ConversionResult, Ocr2MdError> {
        let fp = fingerprint(bytes, config)?;
        if let Some(hit) = self.cache.lookup(&fp) {
            info!("Cache hit for {}", short(&fp));
            return Ok(hit);
        }

        let source = {
            let owned = bytes.to_vec();
            let password = config.password.clone();
            tokio::task::spawn_blocking(move || PdfiumSource::new(owned, password))
                .await
                .map_err(|e| Ocr2MdError::Internal(format!("open task panicked: {e}")))??
        };

        self.run_pipeline(fp, Arc::new(source), config).await
    }

    /// Convert through an explicit [`PageSource`].
    ///
    /// The seam used by tests and by callers with non-pdfium sources; cache
    /// behaviour is identical to [`Converter::convert_bytes`], with `bytes`
    /// contributing the content half of the fingerprint.
    pub async fn convert_source(
        &self,
        bytes: &[u8],
        source: Arc<dyn PageSource>,
        config: &ConversionConfig,
    ) -> Result<ConversionResult, Ocr2MdError> {
        let fp = fingerprint(bytes, config)?;
        if let Some(hit) = self.cache.lookup(&fp) {
            info!("Cache hit for {}", short(&fp));
            return Ok(hit);
        }
        self.run_pipeline(fp, source, config).await
    }

    /// Convert and write the Markdown to a file.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn convert_to_file(
        &self,
        input: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        config: &ConversionConfig,
    ) -> Result<ConversionResult, Ocr2MdError> {
        let result = self.convert(input, config).await?;
        let path = output_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Ocr2MdError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }

        let tmp_path = path.with_extension("md.tmp");
        tokio::fs::write(&tmp_path, &result.markdown)
            .await
            .map_err(|e| Ocr2MdError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Ocr2MdError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(result)
    }

    /// Cache counters: hits, misses, live entries.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached conversion.
    pub fn clear_cache(&self) -> Result<(), Ocr2MdError> {
        self.cache.clear()
    }

    // ── Pipeline ─────────────────────────────────────────────────────────

    async fn run_pipeline(
        &self,
        fp: DocumentFingerprint,
        source: Arc<dyn PageSource>,
        config: &ConversionConfig,
    ) -> Result<ConversionResult, Ocr2MdError> {
        let total_start = Instant::now();

        let metadata = {
            let src = Arc::clone(&source);
            tokio::task::spawn_blocking(move || src.metadata())
                .await
                .map_err(|e| Ocr2MdError::Internal(format!("metadata task panicked: {e}")))??
        };
        let total_pages = source.page_count()?;
        if total_pages == 0 {
            return Err(Ocr2MdError::NoPages);
        }
        info!("PDF has {} pages", total_pages);

        // Resolve the refinement provider once, before any page work: a
        // misconfigured provider should fail the request up front, not after
        // minutes of OCR.
        let provider = if config.refine {
            Some(resolve_provider(config)?)
        } else {
            None
        };

        if let Some(ref cb) = config.progress_callback {
            cb.on_conversion_start(total_pages);
        }

        // Fan out: each page runs extraction and refinement as one task, so
        // a slow refinement on one page never blocks extraction of another.
        let pages: Vec<Result<RefinedPage, Ocr2MdError>> =
            stream::iter((0..total_pages).map(|index| {
                let source = Arc::clone(&source);
                let ocr = Arc::clone(&self.ocr);
                let provider = provider.clone();
                let config = config.clone();
                async move {
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_page_start(index + 1, total_pages);
                    }
                    let record = extract_page(source, ocr, &config, index).await?;
                    let page = refine_record(record, provider.as_ref(), &config).await;

                    if let Some(ref cb) = config.progress_callback {
                        match page_error_text(&page) {
                            Some(detail) => cb.on_page_error(index + 1, total_pages, detail),
                            None => cb.on_page_complete(index + 1, total_pages, page.body.len()),
                        }
                    }
                    Ok(page)
                }
            }))
            .buffer_unordered(config.concurrency)
            .collect()
            .await;

        let pages: Vec<RefinedPage> = pages.into_iter().collect::<Result<_, _>>()?;

        let succeeded = pages.iter().filter(|p| !p.record.ocr_failed).count();
        let result = assemble(
            &fp,
            pages,
            metadata,
            config,
            total_start.elapsed().as_millis() as u64,
        );

        if let Some(ref cb) = config.progress_callback {
            cb.on_conversion_complete(total_pages, succeeded);
        }

        self.cache.store(&fp, &result)?;
        info!(
            "Conversion complete: {} pages ({} direct, {} ocr, {} hybrid, {} failed), {}ms",
            result.stats.total_pages,
            result.stats.direct_pages,
            result.stats.ocr_pages,
            result.stats.hybrid_pages,
            result.stats.failed_pages,
            result.stats.total_duration_ms
        );
        Ok(result)
    }
}

/// Run the refinement stage for one extracted page, folding any failure into
/// the page's provenance. Empty bodies skip the provider call entirely.
async fn refine_record(
    record: crate::pipeline::extract::PageRecord,
    provider: Option<&Arc<dyn RefinementProvider>>,
    config: &ConversionConfig,
) -> RefinedPage {
    let provider = match provider {
        Some(p) if !record.body.trim().is_empty() => p,
        _ => return RefinedPage::unrefined(record),
    };

    let refine_start = Instant::now();
    match refine_page(provider, record.index, &record.body, config).await {
        Ok(text) => RefinedPage {
            body: text,
            record,
            refinement_applied: true,
            refinement_failed: false,
            refine_error: None,
            refine_duration_ms: refine_start.elapsed().as_millis() as u64,
        },
        Err(e) => {
            warn!("Falling back to unrefined text: {e}");
            RefinedPage {
                body: record.body.clone(),
                record,
                refinement_applied: false,
                refinement_failed: true,
                refine_error: Some(e),
                refine_duration_ms: refine_start.elapsed().as_millis() as u64,
            }
        }
    }
}

fn page_error_text(page: &RefinedPage) -> Option<String> {
    page.record
        .error
        .as_ref()
        .or(page.refine_error.as_ref())
        .map(|e| e.to_string())
}

/// Resolve the refinement provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`) — the caller constructed
///    and configured it entirely; used as-is. The route tests take.
/// 2. **Named provider** (`config.provider_name`) — instantiated via the
///    factory, API key from the environment.
/// 3. **Auto-detection** — first available key wins (OpenAI, then Gemini).
fn resolve_provider(
    config: &ConversionConfig,
) -> Result<Arc<dyn RefinementProvider>, Ocr2MdError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }
    if let Some(ref name) = config.provider_name {
        return providers::create_provider(name, config.model.as_deref());
    }
    providers::provider_from_env(config.model.as_deref())
}

/// Read a PDF from disk, mapping I/O errors and validating the magic bytes.
async fn read_pdf_bytes(path: &Path) -> Result<Vec<u8>, Ocr2MdError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Ocr2MdError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Ocr2MdError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(Ocr2MdError::Internal(format!("reading input: {e}"))),
    };

    if bytes.is_empty() {
        return Err(Ocr2MdError::EmptyInput);
    }
    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(Ocr2MdError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Extract PDF metadata without converting content.
///
/// Does not touch the OCR engine, the refinement provider, or the cache.
pub async fn inspect(path: impl AsRef<Path>) -> Result<DocumentMetadata, Ocr2MdError> {
    let path = path.as_ref();
    let bytes = read_pdf_bytes(path).await?;
    tokio::task::spawn_blocking(move || {
        let source = PdfiumSource::new(bytes, None)?;
        source.metadata()
    })
    .await
    .map_err(|e| Ocr2MdError::Internal(format!("inspect task panicked: {e}")))?
}

fn short(fp: &DocumentFingerprint) -> &str {
    let s = fp.as_str();
    &s[..8.min(s.len())]
}
