//! Per-page extraction: run the classifier's decision and build page bodies.
//!
//! One call to [`extract_page`] turns a page index into a [`PageRecord`]:
//! probe → classify → pull text from the chosen source(s) → detect tables →
//! compose the page body in reading order. Pages are independent, so the
//! orchestrator fans these calls out concurrently; everything here is
//! read-only with respect to shared state.
//!
//! pdfium work runs under `spawn_blocking` (CPU-bound, not async-safe);
//! the OCR engine call is async and capped by `config.ocr_timeout_secs`.
//!
//! ## Hybrid reconciliation
//!
//! A hybrid page has a partial text layer and a recognisable image. Both
//! sources are extracted and merged line-by-line by position: the direct
//! line wins whenever it is non-blank (the embedded text layer is exact
//! where it exists), and an OCR line fills a blank or missing slot only when
//! its mean token confidence clears `hybrid_min_ocr_confidence`. Trailing
//! OCR lines beyond the direct line count are appended under the same
//! confidence rule.

use crate::config::ConversionConfig;
use crate::error::{Ocr2MdError, PageError};
use crate::ocr::{OcrEngine, OcrOutput};
use crate::output::PageClassification;
use crate::pipeline::classify::{classify, Decision};
use crate::pipeline::normalize;
use crate::pipeline::tables::{self, Line, TableConfig, TableRegion};
use crate::source::{PageSource, TextSpan};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything extraction learned about one page. Read-only after creation.
#[derive(Debug, Clone)]
pub struct PageRecord {
    /// 0-based page index.
    pub index: usize,
    /// Classifier verdict.
    pub decision: Decision,
    /// Pre-refinement page Markdown: text interleaved with rendered tables
    /// in reading order. Empty when the page is blank or its OCR failed.
    pub body: String,
    /// Number of tables rendered into the body.
    pub tables: usize,
    /// True when OCR was required but the engine failed.
    pub ocr_failed: bool,
    /// The degradation that hit this page, if any.
    pub error: Option<PageError>,
    /// Time spent waiting on the OCR engine.
    pub ocr_duration_ms: u64,
}

/// Extract a single page according to its classification.
///
/// Never returns `Err` for per-page degradations — an OCR failure produces a
/// record with empty text and the error attached. Only infrastructure
/// failures (a panicked blocking task) escape as `Ocr2MdError`.
pub async fn extract_page(
    source: Arc<dyn PageSource>,
    ocr: Arc<dyn OcrEngine>,
    config: &ConversionConfig,
    index: usize,
) -> Result<PageRecord, Ocr2MdError> {
    let probe = {
        let src = Arc::clone(&source);
        match spawn_blocking(move || src.probe(index)).await {
            Ok(probe) => probe,
            Err(e) => {
                // An unreadable page degrades; the rest of the document
                // still converts.
                warn!("Page {}: probe failed: {e}", index + 1);
                return Ok(PageRecord {
                    index,
                    decision: Decision {
                        classification: PageClassification::Direct,
                        confidence: 0.0,
                    },
                    body: String::new(),
                    tables: 0,
                    ocr_failed: false,
                    error: Some(PageError::ExtractionFailed {
                        page: index + 1,
                        detail: e.to_string(),
                    }),
                    ocr_duration_ms: 0,
                });
            }
        }
    };
    let decision = classify(&probe, config);
    debug!(
        "Page {}: classified {} (confidence {:.2})",
        index + 1,
        decision.classification.label(),
        decision.confidence
    );

    match decision.classification {
        PageClassification::Direct => extract_direct(source, config, index, decision).await,
        PageClassification::Ocr => extract_ocr(source, ocr, config, index, decision).await,
        PageClassification::Hybrid => extract_hybrid(source, ocr, config, index, decision).await,
    }
}

// ── Direct ───────────────────────────────────────────────────────────────

async fn extract_direct(
    source: Arc<dyn PageSource>,
    config: &ConversionConfig,
    index: usize,
    decision: Decision,
) -> Result<PageRecord, Ocr2MdError> {
    let spans = load_spans(&source, index).await;
    let detected = detect_from_spans(index, &spans, config);

    let body = if detected.tables.is_empty() {
        // No tables: the library's own reading-order text beats span
        // regrouping, so prefer it.
        let src = Arc::clone(&source);
        match spawn_blocking(move || src.direct_text(index)).await {
            Ok(text) => normalize::normalize_direct(&text),
            Err(e) => {
                warn!("Page {}: direct extraction failed: {e}", index + 1);
                return Ok(PageRecord {
                    index,
                    decision,
                    body: String::new(),
                    tables: 0,
                    ocr_failed: false,
                    error: Some(PageError::ExtractionFailed {
                        page: index + 1,
                        detail: e.to_string(),
                    }),
                    ocr_duration_ms: 0,
                });
            }
        }
    } else {
        let lines = tables::spans_to_lines(&detected.remaining);
        compose_body(&lines, &detected.tables, false)
    };

    Ok(PageRecord {
        index,
        decision,
        tables: detected.tables.len(),
        body,
        ocr_failed: false,
        error: None,
        ocr_duration_ms: 0,
    })
}

// ── OCR ──────────────────────────────────────────────────────────────────

async fn extract_ocr(
    source: Arc<dyn PageSource>,
    ocr: Arc<dyn OcrEngine>,
    config: &ConversionConfig,
    index: usize,
    decision: Decision,
) -> Result<PageRecord, Ocr2MdError> {
    let started = Instant::now();
    let output = match run_ocr(&source, &ocr, config, index).await {
        Ok(output) => output,
        Err(page_error) => {
            // Per-page, non-fatal: the document still completes.
            return Ok(PageRecord {
                index,
                decision,
                body: String::new(),
                tables: 0,
                ocr_failed: true,
                error: Some(page_error),
                ocr_duration_ms: started.elapsed().as_millis() as u64,
            });
        }
    };
    let ocr_duration_ms = started.elapsed().as_millis() as u64;

    let spans = ocr_tokens_to_spans(&output, config.dpi);
    let detected = detect_from_spans(index, &spans, config);

    let body = if detected.tables.is_empty() {
        let text = normalize::normalize_ocr(&output.text);
        normalize::repair_paragraphs(&text)
    } else {
        let lines = tables::spans_to_lines(&detected.remaining);
        compose_body(&lines, &detected.tables, true)
    };

    Ok(PageRecord {
        index,
        decision,
        tables: detected.tables.len(),
        body,
        ocr_failed: false,
        error: None,
        ocr_duration_ms,
    })
}

// ── Hybrid ───────────────────────────────────────────────────────────────

async fn extract_hybrid(
    source: Arc<dyn PageSource>,
    ocr: Arc<dyn OcrEngine>,
    config: &ConversionConfig,
    index: usize,
    decision: Decision,
) -> Result<PageRecord, Ocr2MdError> {
    let spans = load_spans(&source, index).await;
    let detected = detect_from_spans(index, &spans, config);
    let direct_lines = tables::spans_to_lines(&detected.remaining);

    let started = Instant::now();
    let (merged, ocr_failed, error) = match run_ocr(&source, &ocr, config, index).await {
        Ok(output) => {
            let ocr_lines = ocr_output_to_lines(&output, config.dpi);
            let merged = merge_hybrid_lines(
                &direct_lines,
                &ocr_lines,
                config.hybrid_min_ocr_confidence,
            );
            (merged, false, None)
        }
        Err(page_error) => {
            // The direct half still stands on its own; record the
            // degradation and continue with what the text layer gave us.
            warn!("Page {}: hybrid OCR half failed: {page_error}", index + 1);
            (direct_lines.clone(), true, Some(page_error))
        }
    };
    let ocr_duration_ms = started.elapsed().as_millis() as u64;

    let body = compose_body(&merged, &detected.tables, false);

    Ok(PageRecord {
        index,
        decision,
        tables: detected.tables.len(),
        body,
        ocr_failed,
        error,
        ocr_duration_ms,
    })
}

// ── Shared helpers ───────────────────────────────────────────────────────

async fn spawn_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, Ocr2MdError> + Send + 'static,
) -> Result<T, Ocr2MdError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Ocr2MdError::Internal(format!("blocking task panicked: {e}")))?
}

/// Load a page's text spans, degrading to none when the layer is unreadable:
/// losing table detection is better than losing the document.
async fn load_spans(source: &Arc<dyn PageSource>, index: usize) -> Vec<TextSpan> {
    let src = Arc::clone(source);
    match spawn_blocking(move || src.text_spans(index)).await {
        Ok(spans) => spans,
        Err(e) => {
            warn!("Page {}: span extraction failed: {e}", index + 1);
            Vec::new()
        }
    }
}

fn detect_from_spans(
    index: usize,
    spans: &[TextSpan],
    config: &ConversionConfig,
) -> tables::DetectedTables {
    if !config.detect_tables {
        return tables::DetectedTables {
            tables: Vec::new(),
            remaining: spans.to_vec(),
        };
    }
    tables::detect_tables(
        index,
        spans,
        &TableConfig {
            min_rows: config.table_min_rows,
            min_columns: config.table_min_columns,
            column_gap: config.table_column_gap,
        },
    )
}

/// Render the page and run the OCR engine, mapping failures and the timeout
/// onto [`PageError::OcrFailed`].
async fn run_ocr(
    source: &Arc<dyn PageSource>,
    ocr: &Arc<dyn OcrEngine>,
    config: &ConversionConfig,
    index: usize,
) -> Result<OcrOutput, PageError> {
    let image = {
        let src = Arc::clone(source);
        let dpi = config.dpi;
        spawn_blocking(move || src.render_image(index, dpi))
            .await
            .map_err(|e| PageError::OcrFailed {
                page: index + 1,
                detail: format!("rendering: {e}"),
            })?
    };

    let recognition = tokio::time::timeout(
        Duration::from_secs(config.ocr_timeout_secs),
        ocr.recognize(&image, &config.ocr_language),
    )
    .await;

    match recognition {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(PageError::OcrFailed {
            page: index + 1,
            detail: e.to_string(),
        }),
        Err(_) => Err(PageError::OcrFailed {
            page: index + 1,
            detail: format!("timed out after {}s", config.ocr_timeout_secs),
        }),
    }
}

/// Convert OCR word boxes (pixels at `dpi`) into page-space text spans
/// (points), so table detection treats them like PDF text objects.
fn ocr_tokens_to_spans(output: &OcrOutput, dpi: u32) -> Vec<TextSpan> {
    let scale = 72.0 / dpi.max(1) as f32;
    output
        .tokens
        .iter()
        .map(|t| TextSpan {
            text: t.text.clone(),
            x: t.x * scale,
            y: t.y * scale,
            width: t.width * scale,
            height: t.height * scale,
        })
        .collect()
}

/// Rebuild normalised OCR lines with their position and mean confidence.
fn ocr_output_to_lines(output: &OcrOutput, dpi: u32) -> Vec<(Line, f32)> {
    let scale = 72.0 / dpi.max(1) as f32;
    let mut lines: Vec<(Line, f32, usize)> = Vec::new();
    let mut current: Option<(u32, u32, u32)> = None;

    for token in &output.tokens {
        if current != Some(token.line) {
            lines.push((
                Line {
                    y: token.y * scale,
                    text: String::new(),
                },
                0.0,
                0,
            ));
            current = Some(token.line);
        }
        let (line, conf_sum, count) = lines.last_mut().expect("line pushed above");
        if !line.text.is_empty() {
            line.text.push(' ');
        }
        line.text.push_str(&token.text);
        *conf_sum += token.confidence;
        *count += 1;
    }

    lines
        .into_iter()
        .map(|(mut line, conf_sum, count)| {
            line.text = normalize::normalize_ocr(&line.text);
            let mean = if count == 0 { 0.0 } else { conf_sum / count as f32 };
            (line, mean)
        })
        .collect()
}

/// Line-by-line positional merge of the direct and OCR views of a page.
///
/// The direct line wins when non-blank; OCR fills blanks and the tail, but
/// only with lines whose mean confidence clears `min_confidence`.
fn merge_hybrid_lines(
    direct: &[Line],
    ocr_lines: &[(Line, f32)],
    min_confidence: f32,
) -> Vec<Line> {
    let mut merged: Vec<Line> = Vec::with_capacity(direct.len().max(ocr_lines.len()));
    let longest = direct.len().max(ocr_lines.len());

    for i in 0..longest {
        let direct_line = direct.get(i).filter(|l| !l.text.trim().is_empty());
        match direct_line {
            Some(line) => merged.push(line.clone()),
            None => {
                if let Some((line, confidence)) = ocr_lines.get(i) {
                    if *confidence >= min_confidence && !line.text.trim().is_empty() {
                        merged.push(line.clone());
                    }
                }
            }
        }
    }
    merged
}

/// Interleave text lines and rendered tables by vertical position.
///
/// Consecutive lines form a text block; a table is emitted as its own block
/// as soon as its top edge precedes the next line. `repair` runs the
/// paragraph-rejoin pass over text blocks only, so table rows are never
/// merged into prose.
fn compose_body(lines: &[Line], regions: &[TableRegion], repair: bool) -> String {
    let mut sorted_tables: Vec<&TableRegion> = regions.iter().collect();
    sorted_tables.sort_by(|a, b| {
        a.top()
            .partial_cmp(&b.top())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut blocks: Vec<String> = Vec::new();
    let mut text_block: Vec<&str> = Vec::new();
    let mut table_iter = sorted_tables.into_iter().peekable();

    let flush_text = |block: &mut Vec<&str>, blocks: &mut Vec<String>| {
        if block.is_empty() {
            return;
        }
        let text = block.join("\n");
        let text = if repair {
            normalize::repair_paragraphs(&text)
        } else {
            text
        };
        if !text.trim().is_empty() {
            blocks.push(text);
        }
        block.clear();
    };

    for line in lines {
        while let Some(table) = table_iter.peek() {
            if table.top() <= line.y {
                flush_text(&mut text_block, &mut blocks);
                blocks.push(tables::render_markdown(table));
                table_iter.next();
            } else {
                break;
            }
        }
        text_block.push(&line.text);
    }
    flush_text(&mut text_block, &mut blocks);
    for table in table_iter {
        blocks.push(tables::render_markdown(table));
    }

    blocks.join("\n\n")
}
