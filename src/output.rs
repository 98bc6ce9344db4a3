//! Output types: the conversion result, per-page provenance, and stats.
//!
//! Everything here is serde round-trippable because [`ConversionResult`] is
//! exactly what the cache persists — a cache hit deserialises one of these
//! and hands it straight back to the caller. Provenance is deliberately part
//! of the result rather than a log line: an operator auditing a conversion
//! six months later should be able to see which pages were OCR'd, which ones
//! degraded, and whether refinement ran, without replaying anything.

use crate::error::PageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-page extraction strategy chosen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageClassification {
    /// The embedded text layer is trusted; no OCR.
    Direct,
    /// The page is image-only (or near enough); OCR is the sole source.
    Ocr,
    /// Mixed page: both sources extracted and reconciled line-by-line.
    Hybrid,
}

impl PageClassification {
    /// Lowercase label used in provenance output and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            PageClassification::Direct => "direct",
            PageClassification::Ocr => "ocr",
            PageClassification::Hybrid => "hybrid",
        }
    }
}

/// How a single page's text was obtained and what happened to it afterwards.
///
/// One of these exists per page, in page order, inside [`ConversionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageProvenance {
    /// 0-based page index.
    pub index: usize,
    /// Strategy the classifier picked for this page.
    pub classification: PageClassification,
    /// Classifier confidence in [0, 1].
    pub confidence: f32,
    /// True when the OCR engine was needed but failed; the page's text is
    /// empty and `error` holds the detail.
    pub ocr_failed: bool,
    /// Number of tables detected and rendered on this page.
    pub tables: usize,
    /// True when the refinement pass ran and its output was used.
    pub refinement_applied: bool,
    /// True when refinement was requested but failed; the page fell back to
    /// its unrefined text.
    pub refinement_failed: bool,
    /// The degradation that hit this page, if any.
    pub error: Option<PageError>,
}

/// Aggregate statistics for a single conversion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Total pages in the document.
    pub total_pages: usize,
    /// Pages classified `Direct`.
    pub direct_pages: usize,
    /// Pages classified `Ocr`.
    pub ocr_pages: usize,
    /// Pages classified `Hybrid`.
    pub hybrid_pages: usize,
    /// Pages whose OCR step failed (empty text, flagged in provenance).
    pub failed_pages: usize,
    /// Pages whose refinement output was used.
    pub refined_pages: usize,
    /// Tables rendered across all pages.
    pub tables: usize,
    /// Wall-clock duration of the whole conversion.
    pub total_duration_ms: u64,
    /// Time spent in OCR calls.
    pub ocr_duration_ms: u64,
    /// Time spent in refinement calls.
    pub refine_duration_ms: u64,
}

/// Document metadata extracted from the PDF, without converting content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
}

/// The final product of a conversion: assembled Markdown plus everything an
/// operator needs to audit how it was produced.
///
/// Immutable once written. A config or content change produces a new
/// fingerprint and therefore a new record; existing records are never
/// mutated in place (the cache rejects divergent re-stores).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    /// The assembled Markdown document.
    pub markdown: String,
    /// Content + config fingerprint this result is keyed under.
    pub fingerprint: String,
    /// Per-page provenance, ascending page index.
    pub pages: Vec<PageProvenance>,
    /// Document metadata captured at conversion time.
    pub metadata: DocumentMetadata,
    /// Aggregate run statistics.
    pub stats: ConversionStats,
    /// When this result was first computed.
    pub created_at: DateTime<Utc>,
    /// When this result was last served from cache, if ever.
    ///
    /// `None` on a freshly computed result; set by the cache on each hit.
    pub last_reused_at: Option<DateTime<Utc>>,
}

impl ConversionResult {
    /// True when this instance came out of the cache rather than a fresh run.
    pub fn from_cache(&self) -> bool {
        self.last_reused_at.is_some()
    }

    /// Pages that lost fidelity (OCR failure or refinement fallback).
    pub fn degraded_pages(&self) -> impl Iterator<Item = &PageProvenance> {
        self.pages
            .iter()
            .filter(|p| p.ocr_failed || p.refinement_failed)
    }
}
