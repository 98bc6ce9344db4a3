//! # ocr2md
//!
//! Convert PDF documents to Markdown, invoking OCR only where the embedded
//! text layer is unreliable, with a content-addressed conversion cache and
//! an optional LLM cleanup pass.
//!
//! ## Why this crate?
//!
//! Running OCR over every page of every document is slow and lossy: most
//! born-digital PDFs carry a perfectly good text layer, and OCR output is
//! strictly worse than it. This crate classifies each page by its
//! extractable-text density and only pays for OCR where the page is really
//! a picture — scanned pages, or mixed pages where the text layer is
//! partial. Finished conversions are cached under a fingerprint of the file
//! bytes plus the active configuration, so re-converting an unchanged
//! document is a lookup, not a pipeline run.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Fingerprint  SHA-256(bytes + config) → cache lookup, hit short-circuits
//!  ├─ 2. Classify     per page: direct / ocr / hybrid (density heuristic)
//!  ├─ 3. Extract      text layer and/or tesseract OCR, per classification
//!  ├─ 4. Tables       aligned-column detection → GFM pipe tables, in place
//!  ├─ 5. Refine       optional LLM pass (retry/backoff, falls back on failure)
//!  ├─ 6. Assemble     merge pages in index order + provenance
//!  └─ 7. Cache        write-through on success
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr2md::{Converter, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new();
//!     let config = ConversionConfig::default();
//!     let result = converter.convert("document.pdf", &config).await?;
//!     println!("{}", result.markdown);
//!     eprintln!(
//!         "{} pages: {} direct, {} ocr, {} failed",
//!         result.stats.total_pages,
//!         result.stats.direct_pages,
//!         result.stats.ocr_pages,
//!         result.stats.failed_pages,
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Degradation model
//!
//! Per-page failures never abort a document. A page whose OCR engine is
//! unavailable comes back empty and flagged in provenance; a page whose
//! refinement was rejected falls back to its unrefined text. Only
//! document-level input problems (missing file, not a PDF, wrong password)
//! return `Err`.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr2md` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ocr2md = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod fingerprint;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod source;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheBackend, CacheEntry, CacheStats, CacheStore, RetentionPolicy};
pub use config::{ConversionConfig, ConversionConfigBuilder, PageSeparator};
pub use convert::{inspect, Converter};
pub use error::{Ocr2MdError, PageError};
pub use fingerprint::{fingerprint, DocumentFingerprint};
pub use ocr::{OcrEngine, OcrError, OcrOutput, OcrToken, TesseractCli};
pub use output::{
    ConversionResult, ConversionStats, DocumentMetadata, PageClassification, PageProvenance,
};
pub use progress::{ConversionProgressCallback, NoopProgressCallback};
pub use providers::{
    CompletionOptions, GeminiProvider, OpenAiProvider, ProviderError, RefinementProvider,
};
pub use source::{PageProbe, PageSource, PdfiumSource, TextSpan};
