//! Error types for the ocr2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Ocr2MdError`] — **Fatal**: the conversion cannot proceed at all
//!   (unreadable input, invalid configuration, cache inconsistency).
//!   Returned as `Err(Ocr2MdError)` from the top-level `Converter` methods.
//!
//! * [`PageError`] — **Non-fatal**: a single page degraded (OCR engine
//!   unavailable, refinement rejected) but all other pages are fine. Stored
//!   inside [`crate::output::PageProvenance`] so callers can audit partial
//!   success rather than losing the whole document to one bad page.
//!
//! Fatal errors abort before anything is written to the cache; page errors
//! travel with the result and are persisted as part of its provenance.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ocr2md library.
///
/// Page-level degradations use [`PageError`] and are recorded in
/// [`crate::output::PageProvenance`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Ocr2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input was zero bytes long. There is nothing to fingerprint,
    /// so the request is rejected before any pipeline work.
    #[error("Input is empty (0 bytes); refusing to convert")]
    EmptyInput,

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it via ConversionConfig::password.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for encrypted PDF")]
    WrongPassword,

    /// The document opened but reported zero pages.
    #[error("PDF contains no pages")]
    NoPages,

    // ── Cache errors ──────────────────────────────────────────────────────
    /// A second, *different* result was stored under an existing fingerprint.
    ///
    /// Fingerprints are content-deterministic, so two conversions of the same
    /// bytes + config must produce the same result. Divergence means a logic
    /// fault somewhere upstream and is surfaced rather than silently resolved.
    #[error("Cache conflict: fingerprint {fingerprint} already maps to a different result")]
    CacheConflict { fingerprint: String },

    /// The cache backend failed to read or write an entry.
    #[error("Cache backend error: {detail}")]
    CacheBackend { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Refinement was requested but no provider could be resolved.
    #[error("Refinement provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::PageProvenance`] when a page degrades.
/// The overall conversion continues; callers inspect provenance to see
/// exactly which pages lost fidelity and why.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Direct text extraction failed for this page.
    #[error("Page {page}: text extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    /// The OCR engine was unavailable or returned nothing usable.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The refinement provider permanently rejected the request, or the
    /// retry budget was exhausted on transient errors.
    #[error("Page {page}: refinement failed after {retries} retries: {detail}")]
    RefinementFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// A single refinement call exceeded its timeout on every attempt.
    #[error("Page {page}: refinement timed out after {secs}s")]
    RefinementTimeout { page: usize, secs: u64 },
}
