//! Pipeline stages for PDF-to-Markdown conversion.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap collaborator
//! implementations (PDF library, OCR engine, LLM provider) without touching
//! the others.
//!
//! ## Data Flow
//!
//! ```text
//! page ──▶ classify ──▶ extract ──▶ normalize ──▶ tables ──▶ refine
//!          (density)    (direct /   (NFC, ws,     (detect +  (LLM,
//!                        ocr /       paragraph     render     retry/
//!                        hybrid)     repair)       GFM)       backoff)
//!                                        │
//!                                        ▼
//!                                    assemble  (page-order merge)
//! ```
//!
//! 1. [`classify`] — choose direct extraction, OCR, or both, per page
//! 2. [`extract`]  — run the decision; runs pdfium work in `spawn_blocking`
//!    because the PDF library is not async-safe
//! 3. [`normalize`] — deterministic text cleanup (Unicode, whitespace,
//!    paragraph repair, fence stripping)
//! 4. [`tables`]   — detect aligned regions and render GFM pipe tables
//! 5. [`refine`]   — optional LLM pass with retry/backoff; the only stage
//!    with network I/O
//! 6. [`assemble`] — join point: merge pages by index into the final result

pub mod assemble;
pub mod classify;
pub mod extract;
pub mod normalize;
pub mod refine;
pub mod tables;
