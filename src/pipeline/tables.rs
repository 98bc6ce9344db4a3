//! Table structure: detect tabular regions from positioned text, render GFM.
//!
//! Detection is the Stream-mode idea: tables reveal themselves through text
//! *alignment*, not drawn borders. Spans are grouped into physical rows by
//! Y position; a run of consecutive rows whose cells line up on recurring X
//! seams (separated by a configured minimum gap) is a table candidate.
//! Candidates smaller than the configured row/column minimums are discarded
//! rather than emitted as degenerate one-cell tables.
//!
//! The same detector serves both extraction paths: born-digital pages feed
//! it PDF text-object boxes, scanned pages feed it OCR word boxes. Rendering
//! guarantees a well-formed GFM table for any grid: the separator row is as
//! wide as the widest row, shorter rows are right-padded with empty cells
//! (never truncated), and cell text is escaped so literal pipes cannot break
//! column alignment.

use crate::source::TextSpan;
use tracing::debug;

/// Detection knobs, lifted from [`crate::config::ConversionConfig`].
#[derive(Debug, Clone, Copy)]
pub struct TableConfig {
    pub min_rows: usize,
    pub min_columns: usize,
    /// Minimum horizontal gap (points) between two column seams.
    pub column_gap: f32,
}

/// Bounding box of a detected region, top-down page coordinates in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A detected rectangular table: cell grid plus geometry.
///
/// Owned by the page it was found on; `cells` is rectangular (rows padded to
/// the widest row at construction).
#[derive(Debug, Clone, PartialEq)]
pub struct TableRegion {
    pub page_index: usize,
    pub bounds: Rect,
    /// Rows × columns of cell text. Rectangular.
    pub cells: Vec<Vec<String>>,
}

impl TableRegion {
    pub fn row_count(&self) -> usize {
        self.cells.len()
    }

    pub fn column_count(&self) -> usize {
        self.cells.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    /// Top edge, used to place the table back into reading order.
    pub fn top(&self) -> f32 {
        self.bounds.y
    }
}

/// A physical line of text reconstructed from spans, keyed by its Y position.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub y: f32,
    pub text: String,
}

/// Result of table detection over one page's spans.
#[derive(Debug, Default)]
pub struct DetectedTables {
    pub tables: Vec<TableRegion>,
    /// Spans that are not part of any table, original order.
    pub remaining: Vec<TextSpan>,
}

// ── Detection ────────────────────────────────────────────────────────────

/// Detect tables in a page's text spans.
pub fn detect_tables(page_index: usize, spans: &[TextSpan], config: &TableConfig) -> DetectedTables {
    if spans.len() < config.min_rows * config.min_columns {
        return DetectedTables {
            tables: Vec::new(),
            remaining: spans.to_vec(),
        };
    }

    let rows = group_rows(spans);

    // Maximal runs of consecutive rows that each carry enough aligned cells.
    let mut tables = Vec::new();
    let mut used: Vec<bool> = vec![false; spans.len()];
    let mut run_start: Option<usize> = None;

    for i in 0..=rows.len() {
        let row_qualifies = i < rows.len() && rows[i].len() >= config.min_columns;
        match (run_start, row_qualifies) {
            (None, true) => run_start = Some(i),
            (Some(start), false) => {
                if i - start >= config.min_rows {
                    if let Some(table) =
                        build_table(page_index, spans, &rows[start..i], config, &mut used)
                    {
                        tables.push(table);
                    }
                }
                run_start = None;
            }
            _ => {}
        }
    }

    let remaining: Vec<TextSpan> = spans
        .iter()
        .enumerate()
        .filter(|(i, _)| !used[*i])
        .map(|(_, s)| s.clone())
        .collect();

    if !tables.is_empty() {
        debug!(
            "Page {}: {} table(s) detected, {} spans left as prose",
            page_index + 1,
            tables.len(),
            remaining.len()
        );
    }

    DetectedTables { tables, remaining }
}

/// Group span indices into physical rows by Y proximity.
///
/// Spans are assumed pre-sorted by (y, x); the tolerance is half the median
/// span height, floored at 2 pt, so tight line spacing still separates rows.
fn group_rows(spans: &[TextSpan]) -> Vec<Vec<usize>> {
    let mut heights: Vec<f32> = spans.iter().map(|s| s.height).filter(|h| *h > 0.0).collect();
    heights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_height = heights.get(heights.len() / 2).copied().unwrap_or(10.0);
    let tolerance = (median_height * 0.5).max(2.0);

    let mut rows: Vec<Vec<usize>> = Vec::new();
    let mut current_y = f32::NEG_INFINITY;

    for (i, span) in spans.iter().enumerate() {
        if (span.y - current_y).abs() > tolerance {
            rows.push(Vec::new());
            current_y = span.y;
        }
        rows.last_mut().expect("row pushed above").push(i);
    }

    for row in &mut rows {
        row.sort_by(|&a, &b| {
            spans[a]
                .x
                .partial_cmp(&spans[b].x)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    rows
}

/// Build a rectangular table from a run of rows, or None when the columns
/// don't line up well enough.
/// Fraction of a candidate's spans that must start on a qualifying seam.
/// Table cells all do; prose only aligns at the left margin plus whatever
/// word starts coincide by accident.
const MIN_ALIGNMENT_RATIO: f32 = 0.75;

fn build_table(
    page_index: usize,
    spans: &[TextSpan],
    rows: &[Vec<usize>],
    config: &TableConfig,
    used: &mut [bool],
) -> Option<TableRegion> {
    let seams = column_seams(spans, rows, config.column_gap);
    if seams.len() < config.min_columns {
        return None;
    }

    let total = rows.iter().map(Vec::len).sum::<usize>();
    let aligned = rows
        .iter()
        .flatten()
        .filter(|&&i| {
            let x = spans[i].x;
            // Clusters are at least `column_gap` apart, so membership in a
            // qualifying seam's cluster is exactly this interval test.
            seams
                .iter()
                .any(|&s| x >= s && x - s < config.column_gap)
        })
        .count();
    if total == 0 || (aligned as f32 / total as f32) < MIN_ALIGNMENT_RATIO {
        return None;
    }

    let mut cells: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    for row in rows {
        let mut row_cells: Vec<String> = vec![String::new(); seams.len()];
        for &idx in row {
            let span = &spans[idx];
            let col = seam_for(&seams, span.x);
            if !row_cells[col].is_empty() {
                row_cells[col].push(' ');
            }
            row_cells[col].push_str(span.text.trim());
        }
        cells.push(row_cells);
    }

    // A grid where most rows populate only one column is a paragraph in
    // disguise, not a table.
    let populated_ok = cells
        .iter()
        .filter(|r| r.iter().filter(|c| !c.is_empty()).count() >= config.min_columns)
        .count();
    if populated_ok < config.min_rows {
        return None;
    }

    for row in rows {
        for &idx in row {
            used[idx] = true;
        }
    }

    let members: Vec<&TextSpan> = rows.iter().flatten().map(|&i| &spans[i]).collect();
    let left = members.iter().map(|s| s.x).fold(f32::INFINITY, f32::min);
    let top = members.iter().map(|s| s.y).fold(f32::INFINITY, f32::min);
    let right = members
        .iter()
        .map(|s| s.x + s.width)
        .fold(f32::NEG_INFINITY, f32::max);
    let bottom = members
        .iter()
        .map(|s| s.y + s.height)
        .fold(f32::NEG_INFINITY, f32::max);

    Some(TableRegion {
        page_index,
        bounds: Rect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        },
        cells: pad_rectangular(cells),
    })
}

/// Cluster span start-X positions into column seams separated by at least
/// `gap` points. Returns seam left edges, ascending.
///
/// A cluster only counts as a seam when spans from at least half the rows
/// start on it: table columns recur on every row, while word starts in
/// ordinary prose land on a different X each line. Without this recurrence
/// requirement every dense OCR paragraph would read as a table.
fn column_seams(spans: &[TextSpan], rows: &[Vec<usize>], gap: f32) -> Vec<f32> {
    let mut starts: Vec<(f32, usize)> = Vec::new();
    for (row_idx, row) in rows.iter().enumerate() {
        for &i in row {
            starts.push((spans[i].x, row_idx));
        }
    }
    starts.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let required_rows = rows.len().div_ceil(2);
    let mut seams: Vec<f32> = Vec::new();
    let mut cluster_x = f32::NEG_INFINITY;
    let mut cluster_rows: Vec<usize> = Vec::new();

    let flush = |x: f32, members: &mut Vec<usize>, seams: &mut Vec<f32>| {
        members.sort_unstable();
        members.dedup();
        if members.len() >= required_rows && x.is_finite() {
            seams.push(x);
        }
        members.clear();
    };

    for (x, row_idx) in starts {
        if x - cluster_x >= gap {
            let prev = cluster_x;
            flush(prev, &mut cluster_rows, &mut seams);
            cluster_x = x;
        }
        cluster_rows.push(row_idx);
    }
    flush(cluster_x, &mut cluster_rows, &mut seams);
    seams
}

/// The column index a span starting at `x` belongs to: the rightmost seam at
/// or left of it.
fn seam_for(seams: &[f32], x: f32) -> usize {
    // Small slack absorbs sub-point jitter in left edges within a column.
    match seams.iter().rposition(|&s| s <= x + 0.5) {
        Some(i) => i,
        None => 0,
    }
}

/// Right-pad ragged rows with empty cells so the grid is rectangular.
fn pad_rectangular(mut cells: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let width = cells.iter().map(|r| r.len()).max().unwrap_or(0);
    for row in &mut cells {
        row.resize(width, String::new());
    }
    cells
}

// ── Rendering ────────────────────────────────────────────────────────────

/// Render a table region as a GFM pipe table with a header-separator row.
///
/// Invariant: the separator has exactly as many cells as the widest row, and
/// every emitted row is padded to that width, so the output parses as a
/// well-formed table in any standard renderer.
pub fn render_markdown(region: &TableRegion) -> String {
    let width = region.column_count();
    if width == 0 || region.cells.is_empty() {
        return String::new();
    }

    let render_row = |cells: &[String]| -> String {
        let mut out = String::from("|");
        for i in 0..width {
            out.push(' ');
            out.push_str(&escape_cell(cells.get(i).map(String::as_str).unwrap_or("")));
            out.push_str(" |");
        }
        out
    };

    let mut lines = Vec::with_capacity(region.cells.len() + 1);
    lines.push(render_row(&region.cells[0]));
    lines.push(format!("|{}", " --- |".repeat(width)));
    for row in &region.cells[1..] {
        lines.push(render_row(row));
    }
    lines.join("\n")
}

/// Escape cell text so it cannot break the table syntax: pipes are escaped,
/// embedded newlines flattened to spaces.
fn escape_cell(text: &str) -> String {
    text.replace('\n', " ").replace('|', "\\|").trim().to_string()
}

// ── Line reconstruction (shared with extraction) ─────────────────────────

/// Rebuild physical text lines from non-table spans, in reading order.
pub fn spans_to_lines(spans: &[TextSpan]) -> Vec<Line> {
    let mut sorted: Vec<&TextSpan> = spans.iter().collect();
    sorted.sort_by(|a, b| {
        a.y.partial_cmp(&b.y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut heights: Vec<f32> = sorted.iter().map(|s| s.height).filter(|h| *h > 0.0).collect();
    heights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_height = heights.get(heights.len() / 2).copied().unwrap_or(10.0);
    let tolerance = (median_height * 0.5).max(2.0);

    let mut lines: Vec<Line> = Vec::new();
    let mut current_y = f32::NEG_INFINITY;

    for span in sorted {
        if (span.y - current_y).abs() > tolerance {
            lines.push(Line {
                y: span.y,
                text: String::new(),
            });
            current_y = span.y;
        }
        let line = lines.last_mut().expect("line pushed above");
        if !line.text.is_empty() {
            line.text.push(' ');
        }
        line.text.push_str(span.text.trim());
    }
    lines
}
