//! Document assembly: merge per-page results into the final Markdown.
//!
//! Assembly is the pipeline's join point. Pages may have been extracted and
//! refined in any completion order; here they are sorted by page index and
//! concatenated, so the output is deterministic for deterministic inputs
//! regardless of scheduling. That determinism is load-bearing: the cache
//! treats a divergent re-store under one fingerprint as a logic fault.
//!
//! Empty pages (blank, or OCR-failed) contribute no body text but keep their
//! place in provenance; separators are only emitted between non-empty
//! neighbours so a failed page never produces a dangling page break.

use crate::config::ConversionConfig;
use crate::error::PageError;
use crate::fingerprint::DocumentFingerprint;
use crate::output::{ConversionResult, ConversionStats, DocumentMetadata, PageProvenance};
use crate::pipeline::extract::PageRecord;
use crate::output::PageClassification;
use chrono::Utc;
use tracing::debug;

/// A page record plus the outcome of its refinement stage.
#[derive(Debug, Clone)]
pub struct RefinedPage {
    pub record: PageRecord,
    /// Final page body: refined text when refinement succeeded, the
    /// pre-refinement body otherwise.
    pub body: String,
    pub refinement_applied: bool,
    pub refinement_failed: bool,
    /// Refinement failure detail, when any. Extraction-stage errors live on
    /// the record itself.
    pub refine_error: Option<PageError>,
    pub refine_duration_ms: u64,
}

impl RefinedPage {
    /// Wrap a record whose refinement stage did not run.
    pub fn unrefined(record: PageRecord) -> Self {
        let body = record.body.clone();
        Self {
            record,
            body,
            refinement_applied: false,
            refinement_failed: false,
            refine_error: None,
            refine_duration_ms: 0,
        }
    }
}

/// Merge refined pages into the final [`ConversionResult`].
pub fn assemble(
    fingerprint: &DocumentFingerprint,
    mut pages: Vec<RefinedPage>,
    metadata: DocumentMetadata,
    config: &ConversionConfig,
    total_duration_ms: u64,
) -> ConversionResult {
    // Completion order is whatever the scheduler produced; output order is
    // always page order.
    pages.sort_by_key(|p| p.record.index);

    let mut markdown = String::new();
    if config.include_metadata {
        markdown.push_str(&format_yaml_front_matter(&metadata));
    }

    let mut emitted_any = false;
    for page in &pages {
        let body = page.body.trim();
        if body.is_empty() {
            continue;
        }
        if emitted_any {
            markdown.push_str(&config.page_separator.render(page.record.index + 1));
        }
        markdown.push_str(body);
        emitted_any = true;
    }
    if !markdown.is_empty() && !markdown.ends_with('\n') {
        markdown.push('\n');
    }

    let stats = build_stats(&pages, total_duration_ms);
    let provenance: Vec<PageProvenance> = pages.into_iter().map(page_provenance).collect();

    debug!(
        "Assembled {} pages → {} bytes of Markdown",
        provenance.len(),
        markdown.len()
    );

    ConversionResult {
        markdown,
        fingerprint: fingerprint.to_string(),
        pages: provenance,
        metadata,
        stats,
        created_at: Utc::now(),
        last_reused_at: None,
    }
}

fn page_provenance(page: RefinedPage) -> PageProvenance {
    let RefinedPage {
        record,
        refinement_applied,
        refinement_failed,
        refine_error,
        ..
    } = page;
    PageProvenance {
        index: record.index,
        classification: record.decision.classification,
        confidence: record.decision.confidence,
        ocr_failed: record.ocr_failed,
        tables: record.tables,
        refinement_applied,
        refinement_failed,
        error: record.error.or(refine_error),
    }
}

fn build_stats(pages: &[RefinedPage], total_duration_ms: u64) -> ConversionStats {
    let mut stats = ConversionStats {
        total_pages: pages.len(),
        total_duration_ms,
        ..Default::default()
    };
    for page in pages {
        match page.record.decision.classification {
            PageClassification::Direct => stats.direct_pages += 1,
            PageClassification::Ocr => stats.ocr_pages += 1,
            PageClassification::Hybrid => stats.hybrid_pages += 1,
        }
        if page.record.ocr_failed {
            stats.failed_pages += 1;
        }
        if page.refinement_applied {
            stats.refined_pages += 1;
        }
        stats.tables += page.record.tables;
        stats.ocr_duration_ms += page.record.ocr_duration_ms;
        stats.refine_duration_ms += page.refine_duration_ms;
    }
    stats
}

/// Format document metadata as YAML front matter.
fn format_yaml_front_matter(meta: &DocumentMetadata) -> String {
    let mut yaml = String::from("---\n");

    if let Some(ref t) = meta.title {
        yaml.push_str(&format!("title: \"{}\"\n", t));
    }
    if let Some(ref a) = meta.author {
        yaml.push_str(&format!("author: \"{}\"\n", a));
    }
    if let Some(ref s) = meta.subject {
        yaml.push_str(&format!("subject: \"{}\"\n", s));
    }
    if let Some(ref c) = meta.creator {
        yaml.push_str(&format!("creator: \"{}\"\n", c));
    }
    if let Some(ref p) = meta.producer {
        yaml.push_str(&format!("producer: \"{}\"\n", p));
    }
    yaml.push_str(&format!("pages: {}\n", meta.page_count));

    yaml.push_str("---\n\n");
    yaml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSeparator;
    use crate::fingerprint::fingerprint;
    use crate::pipeline::classify::Decision;

    fn record(index: usize, body: &str) -> PageRecord {
        PageRecord {
            index,
            decision: Decision {
                classification: PageClassification::Direct,
                confidence: 0.9,
            },
            body: body.to_string(),
            tables: 0,
            ocr_failed: false,
            error: None,
            ocr_duration_ms: 0,
        }
    }

    fn fp() -> DocumentFingerprint {
        fingerprint(b"%PDF test", &ConversionConfig::default()).unwrap()
    }

    #[test]
    fn pages_merge_in_index_order_regardless_of_arrival() {
        let pages = vec![
            RefinedPage::unrefined(record(2, "# Third")),
            RefinedPage::unrefined(record(0, "# First")),
            RefinedPage::unrefined(record(1, "# Second")),
        ];
        let result = assemble(
            &fp(),
            pages,
            DocumentMetadata::default(),
            &ConversionConfig::default(),
            0,
        );
        let first = result.markdown.find("First").unwrap();
        let second = result.markdown.find("Second").unwrap();
        let third = result.markdown.find("Third").unwrap();
        assert!(first < second && second < third);
        assert_eq!(result.pages[0].index, 0);
        assert_eq!(result.pages[2].index, 2);
    }

    #[test]
    fn separator_only_between_nonempty_pages() {
        let config = ConversionConfig::builder()
            .page_separator(PageSeparator::HorizontalRule)
            .build()
            .unwrap();
        let pages = vec![
            RefinedPage::unrefined(record(0, "alpha")),
            RefinedPage::unrefined(record(1, "")),
            RefinedPage::unrefined(record(2, "gamma")),
        ];
        let result = assemble(&fp(), pages, DocumentMetadata::default(), &config, 0);
        assert_eq!(result.markdown.matches("---").count(), 1);
    }

    #[test]
    fn empty_document_has_empty_markdown() {
        let pages = vec![RefinedPage::unrefined(record(0, ""))];
        let result = assemble(
            &fp(),
            pages,
            DocumentMetadata::default(),
            &ConversionConfig::default(),
            0,
        );
        assert!(result.markdown.is_empty());
        assert_eq!(result.pages.len(), 1);
    }

    #[test]
    fn front_matter_prepended_when_requested() {
        let config = ConversionConfig::builder()
            .include_metadata(true)
            .build()
            .unwrap();
        let metadata = DocumentMetadata {
            title: Some("Contract".into()),
            page_count: 1,
            ..Default::default()
        };
        let pages = vec![RefinedPage::unrefined(record(0, "body"))];
        let result = assemble(&fp(), pages, metadata, &config, 0);
        assert!(result.markdown.starts_with("---\n"));
        assert!(result.markdown.contains("title: \"Contract\""));
    }

    #[test]
    fn stats_aggregate_classifications_and_failures() {
        let mut failed = record(1, "");
        failed.decision.classification = PageClassification::Ocr;
        failed.ocr_failed = true;

        let mut refined = RefinedPage::unrefined(record(0, "ok"));
        refined.refinement_applied = true;

        let result = assemble(
            &fp(),
            vec![refined, RefinedPage::unrefined(failed)],
            DocumentMetadata::default(),
            &ConversionConfig::default(),
            12,
        );
        assert_eq!(result.stats.total_pages, 2);
        assert_eq!(result.stats.direct_pages, 1);
        assert_eq!(result.stats.ocr_pages, 1);
        assert_eq!(result.stats.failed_pages, 1);
        assert_eq!(result.stats.refined_pages, 1);
        assert_eq!(result.stats.total_duration_ms, 12);
    }

    #[test]
    fn assembly_is_deterministic() {
        let build = || {
            assemble(
                &fp(),
                vec![
                    RefinedPage::unrefined(record(0, "# A")),
                    RefinedPage::unrefined(record(1, "# B")),
                ],
                DocumentMetadata::default(),
                &ConversionConfig::default(),
                0,
            )
        };
        assert_eq!(build().markdown, build().markdown);
    }
}
