//! End-to-end pipeline tests over mock collaborators.
//!
//! Everything here runs hermetically: the PDF source, the OCR engine, and
//! the refinement provider are in-memory fakes, so the tests exercise the
//! real classification, extraction, reconciliation, caching, and assembly
//! paths without pdfium, tesseract, or network access.

use async_trait::async_trait;
use image::DynamicImage;
use ocr2md::{
    CacheStore, CompletionOptions, ConversionConfig, Converter, DocumentMetadata, OcrEngine,
    OcrOutput, OcrToken, Ocr2MdError, PageClassification, PageProbe, PageSource, ProviderError,
    RefinementProvider, TextSpan,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ── Mock page source ─────────────────────────────────────────────────────

#[derive(Clone)]
struct MockPage {
    probe: PageProbe,
    text: String,
    spans: Vec<TextSpan>,
}

impl MockPage {
    /// A born-digital text page: high density, no images.
    fn direct(text: &str) -> Self {
        Self {
            probe: PageProbe {
                char_count: 2000,
                area_sq_in: 93.5,
                image_count: 0,
            },
            text: text.to_string(),
            spans: Vec::new(),
        }
    }

    /// A scanned page: no text layer, one big image.
    fn scanned() -> Self {
        Self {
            probe: PageProbe {
                char_count: 0,
                area_sq_in: 93.5,
                image_count: 1,
            },
            text: String::new(),
            spans: Vec::new(),
        }
    }

    /// A completely blank page: no glyphs, no images.
    fn blank() -> Self {
        Self {
            probe: PageProbe {
                char_count: 0,
                area_sq_in: 93.5,
                image_count: 0,
            },
            text: String::new(),
            spans: Vec::new(),
        }
    }

    fn with_spans(mut self, spans: Vec<TextSpan>) -> Self {
        self.spans = spans;
        self
    }
}

struct MockSource {
    pages: Vec<MockPage>,
}

impl MockSource {
    fn new(pages: Vec<MockPage>) -> Arc<Self> {
        Arc::new(Self { pages })
    }
}

impl PageSource for MockSource {
    fn page_count(&self) -> Result<usize, Ocr2MdError> {
        Ok(self.pages.len())
    }

    fn probe(&self, index: usize) -> Result<PageProbe, Ocr2MdError> {
        Ok(self.pages[index].probe)
    }

    fn direct_text(&self, index: usize) -> Result<String, Ocr2MdError> {
        Ok(self.pages[index].text.clone())
    }

    fn text_spans(&self, index: usize) -> Result<Vec<TextSpan>, Ocr2MdError> {
        Ok(self.pages[index].spans.clone())
    }

    fn render_image(&self, index: usize, _dpi: u32) -> Result<DynamicImage, Ocr2MdError> {
        // Encode the page index in the image width so the mock OCR engine
        // can tell pages apart without any shared state.
        Ok(DynamicImage::new_rgba8(1000 + index as u32, 10))
    }

    fn metadata(&self) -> Result<DocumentMetadata, Ocr2MdError> {
        Ok(DocumentMetadata {
            page_count: self.pages.len(),
            ..Default::default()
        })
    }
}

// ── Mock OCR engine ──────────────────────────────────────────────────────

struct MockOcr {
    /// Recognised text per page index.
    texts: Vec<&'static str>,
    /// Pages whose recognition blows up.
    fail_pages: HashSet<usize>,
}

impl MockOcr {
    fn ok(texts: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            texts,
            fail_pages: HashSet::new(),
        })
    }

    fn failing_on(texts: Vec<&'static str>, fail: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            texts,
            fail_pages: fail.iter().copied().collect(),
        })
    }
}

#[async_trait]
impl OcrEngine for MockOcr {
    async fn recognize(
        &self,
        image: &DynamicImage,
        _language: &str,
    ) -> Result<OcrOutput, ocr2md::ocr::OcrError> {
        let index = (image.width() - 1000) as usize;
        if self.fail_pages.contains(&index) {
            return Err(ocr2md::ocr::OcrError::Unavailable {
                detail: "engine offline".into(),
            });
        }
        let text = self.texts.get(index).copied().unwrap_or("");
        Ok(OcrOutput {
            text: text.to_string(),
            tokens: tokens_for(text),
        })
    }
}

/// One high-confidence token per word, laid out left-to-right per line.
fn tokens_for(text: &str) -> Vec<OcrToken> {
    let mut tokens = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        for (word_idx, word) in line.split_whitespace().enumerate() {
            tokens.push(OcrToken {
                text: word.to_string(),
                confidence: 0.92,
                x: word_idx as f32 * 120.0,
                y: line_idx as f32 * 60.0,
                width: 100.0,
                height: 40.0,
                line: (1, 1, line_idx as u32 + 1),
            });
        }
    }
    tokens
}

// ── Mock refinement providers ────────────────────────────────────────────

struct RejectingProvider {
    calls: AtomicU32,
}

#[async_trait]
impl RefinementProvider for RejectingProvider {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn complete(
        &self,
        _system: &str,
        _text: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Permanent {
            detail: "HTTP 401: invalid api key".into(),
        })
    }
}

struct UppercasingProvider;

#[async_trait]
impl RefinementProvider for UppercasingProvider {
    fn name(&self) -> &str {
        "uppercasing"
    }

    async fn complete(
        &self,
        _system: &str,
        text: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        // The page body follows the language-context preamble.
        let body = text.split("\n\n").skip(1).collect::<Vec<_>>().join("\n\n");
        Ok(body.to_uppercase())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn span(text: &str, x: f32, y: f32) -> TextSpan {
    TextSpan {
        text: text.to_string(),
        x,
        y,
        width: 60.0,
        height: 10.0,
    }
}

fn base_config() -> ConversionConfig {
    ConversionConfig::builder()
        .concurrency(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

// ── Cache behaviour ──────────────────────────────────────────────────────

#[tokio::test]
async fn second_conversion_is_a_cache_hit_with_identical_output() {
    let converter = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec![]));
    let source = MockSource::new(vec![MockPage::direct("Hello from page one.")]);
    let config = base_config();

    let first = converter
        .convert_source(b"%PDF doc-1", source.clone(), &config)
        .await
        .unwrap();
    assert!(!first.from_cache());
    assert_eq!(converter.cache_stats().entries, 1);

    let second = converter
        .convert_source(b"%PDF doc-1", source, &config)
        .await
        .unwrap();
    assert!(second.from_cache(), "second call must be served from cache");
    assert_eq!(second.markdown, first.markdown);
    assert_eq!(second.pages.len(), first.pages.len());

    let stats = converter.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn config_change_misses_the_cache() {
    let converter = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec![]));
    let source = MockSource::new(vec![MockPage::direct("Same bytes.")]);

    converter
        .convert_source(b"%PDF doc-2", source.clone(), &base_config())
        .await
        .unwrap();

    let other_config = ConversionConfig::builder()
        .ocr_language("spa")
        .build()
        .unwrap();
    converter
        .convert_source(b"%PDF doc-2", source, &other_config)
        .await
        .unwrap();

    let stats = converter.cache_stats();
    assert_eq!(stats.entries, 2, "different config must be a distinct entry");
    assert_eq!(stats.hits, 0);
}

// ── Classification & extraction ──────────────────────────────────────────

#[tokio::test]
async fn scanned_pages_go_through_ocr() {
    let converter = Converter::with_parts(
        CacheStore::in_memory(),
        MockOcr::ok(vec!["Recognised scanned text."]),
    );
    let source = MockSource::new(vec![MockPage::scanned()]);

    let result = converter
        .convert_source(b"%PDF doc-3", source, &base_config())
        .await
        .unwrap();

    assert_eq!(result.pages[0].classification, PageClassification::Ocr);
    assert!(result.markdown.contains("Recognised scanned text."));
    assert_eq!(result.stats.ocr_pages, 1);
}

#[tokio::test]
async fn partial_ocr_failure_degrades_only_that_page() {
    // 3-page scanned document; the engine dies on page 2 (index 1).
    let converter = Converter::with_parts(
        CacheStore::in_memory(),
        MockOcr::failing_on(
            vec!["Page one text.", "unused", "Page three text."],
            &[1],
        ),
    );
    let source = MockSource::new(vec![
        MockPage::scanned(),
        MockPage::scanned(),
        MockPage::scanned(),
    ]);

    let result = converter
        .convert_source(b"%PDF doc-4", source, &base_config())
        .await
        .expect("document must still complete");

    assert!(result.markdown.contains("Page one text."));
    assert!(result.markdown.contains("Page three text."));

    let failed = &result.pages[1];
    assert!(failed.ocr_failed, "page 2 must be flagged ocr-failed");
    assert!(failed.error.is_some());
    assert_eq!(result.stats.failed_pages, 1);

    let ok_pages: Vec<_> = result.pages.iter().filter(|p| !p.ocr_failed).collect();
    assert_eq!(ok_pages.len(), 2);
}

#[tokio::test]
async fn hybrid_page_merges_direct_and_ocr_lines() {
    // Density between the bands + an image → hybrid. The text layer has one
    // real line; OCR sees that line plus a second one the layer lacks.
    let page = MockPage {
        probe: PageProbe {
            char_count: 100,
            area_sq_in: 93.5,
            image_count: 1,
        },
        text: String::new(),
        spans: vec![span("Embedded first line.", 10.0, 10.0)],
    };
    let converter = Converter::with_parts(
        CacheStore::in_memory(),
        MockOcr::ok(vec!["Embedded f1rst line.\nSecond line only OCR saw."]),
    );
    let source = MockSource::new(vec![page]);

    let result = converter
        .convert_source(b"%PDF doc-5", source, &base_config())
        .await
        .unwrap();

    assert_eq!(result.pages[0].classification, PageClassification::Hybrid);
    // The embedded line wins over its OCR double; the OCR-only tail is kept.
    assert!(result.markdown.contains("Embedded first line."));
    assert!(!result.markdown.contains("f1rst"));
    assert!(result.markdown.contains("Second line only OCR saw."));
}

// ── Tables ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn aligned_spans_become_a_markdown_table_in_reading_order() {
    let spans = vec![
        span("Quarterly results follow.", 10.0, 10.0),
        // 2×3 grid starting at y=40.
        span("Region", 10.0, 40.0),
        span("Revenue", 150.0, 40.0),
        span("Growth", 290.0, 40.0),
        span("North", 10.0, 60.0),
        span("1,200", 150.0, 60.0),
        span("4%", 290.0, 60.0),
        span("That concludes the table.", 10.0, 100.0),
    ];
    let page = MockPage::direct("ignored when tables are present").with_spans(spans);
    let converter = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec![]));
    let source = MockSource::new(vec![page]);

    let result = converter
        .convert_source(b"%PDF doc-6", source, &base_config())
        .await
        .unwrap();

    assert_eq!(result.pages[0].tables, 1);
    assert!(result.markdown.contains("| Region | Revenue | Growth |"));
    assert!(result.markdown.contains("| --- | --- | --- |"));

    let intro = result.markdown.find("Quarterly").unwrap();
    let table = result.markdown.find("| Region").unwrap();
    let outro = result.markdown.find("That concludes").unwrap();
    assert!(intro < table && table < outro, "table must sit at its position");
}

#[tokio::test]
async fn table_detection_can_be_disabled() {
    let spans = vec![
        span("a", 10.0, 40.0),
        span("b", 150.0, 40.0),
        span("c", 10.0, 60.0),
        span("d", 150.0, 60.0),
    ];
    let page = MockPage::direct("a b\nc d").with_spans(spans);
    let converter = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec![]));
    let source = MockSource::new(vec![page]);

    let config = ConversionConfig::builder()
        .detect_tables(false)
        .build()
        .unwrap();
    let result = converter
        .convert_source(b"%PDF doc-7", source, &config)
        .await
        .unwrap();

    assert_eq!(result.pages[0].tables, 0);
    assert!(!result.markdown.contains('|'));
}

// ── Refinement ───────────────────────────────────────────────────────────

#[tokio::test]
async fn refinement_failure_falls_back_to_unrefined_text() {
    let rejecting = Arc::new(RejectingProvider {
        calls: AtomicU32::new(0),
    });
    let config = ConversionConfig::builder()
        .refine(true)
        .provider(rejecting.clone())
        .retry_backoff_ms(1)
        .build()
        .unwrap();

    let converter = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec![]));
    let source = MockSource::new(vec![
        MockPage::direct("First page text."),
        MockPage::direct("Second page text."),
    ]);

    let result = converter
        .convert_source(b"%PDF doc-8", source, &config)
        .await
        .expect("refinement failure must not fail the document");

    // Output equals the pre-refinement text.
    assert!(result.markdown.contains("First page text."));
    assert!(result.markdown.contains("Second page text."));

    for page in &result.pages {
        assert!(page.refinement_failed, "page {} must be flagged", page.index);
        assert!(!page.refinement_applied);
    }
    assert_eq!(result.stats.refined_pages, 0);
    // Permanent errors must not be retried: one call per page.
    assert_eq!(rejecting.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn successful_refinement_replaces_page_text() {
    let config = ConversionConfig::builder()
        .refine(true)
        .provider(Arc::new(UppercasingProvider))
        .build()
        .unwrap();

    let converter = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec![]));
    let source = MockSource::new(vec![MockPage::direct("quiet text")]);

    let result = converter
        .convert_source(b"%PDF doc-9", source, &config)
        .await
        .unwrap();

    assert!(result.markdown.contains("QUIET TEXT"));
    assert!(result.pages[0].refinement_applied);
    assert_eq!(result.stats.refined_pages, 1);
}

#[tokio::test]
async fn refinement_disabled_is_identity_without_provider() {
    // No provider configured anywhere; refine=false must never need one.
    let converter = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec![]));
    let source = MockSource::new(vec![MockPage::direct("Untouched text.")]);

    let result = converter
        .convert_source(b"%PDF doc-10", source, &base_config())
        .await
        .unwrap();

    assert!(result.markdown.contains("Untouched text."));
    assert!(!result.pages[0].refinement_applied);
    assert!(!result.pages[0].refinement_failed);
}

// ── Blank-page end-to-end scenario ───────────────────────────────────────

#[tokio::test]
async fn blank_document_classifies_direct_and_caches() {
    let converter = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec![]));
    let source = MockSource::new(vec![MockPage::blank()]);
    let config = base_config();

    let first = converter
        .convert_source(b"%PDF doc-11", source.clone(), &config)
        .await
        .unwrap();

    // Blank page: direct classification, empty body, no tables, no OCR.
    assert_eq!(first.pages[0].classification, PageClassification::Direct);
    assert!(first.markdown.is_empty());
    assert_eq!(first.pages[0].tables, 0);
    assert_eq!(first.stats.ocr_pages, 0);
    assert_eq!(converter.cache_stats().entries, 1);

    let hits_before = converter.cache_stats().hits;
    let second = converter
        .convert_source(b"%PDF doc-11", source, &config)
        .await
        .unwrap();
    assert_eq!(second.markdown, first.markdown);
    assert_eq!(converter.cache_stats().hits, hits_before + 1);
}

// ── Determinism ──────────────────────────────────────────────────────────

#[tokio::test]
async fn independent_converters_produce_identical_markdown() {
    let make_source = || {
        MockSource::new(vec![
            MockPage::direct("Page one."),
            MockPage::scanned(),
            MockPage::direct("Page three."),
        ])
    };
    let config = ConversionConfig::builder()
        .page_separator(ocr2md::PageSeparator::HorizontalRule)
        .build()
        .unwrap();

    let a = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec!["", "Scan.", ""]))
        .convert_source(b"%PDF doc-12", make_source(), &config)
        .await
        .unwrap();
    let b = Converter::with_parts(CacheStore::in_memory(), MockOcr::ok(vec!["", "Scan.", ""]))
        .convert_source(b"%PDF doc-12", make_source(), &config)
        .await
        .unwrap();

    assert_eq!(a.markdown, b.markdown);
    assert_eq!(a.fingerprint, b.fingerprint);
}
