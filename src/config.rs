//! Configuration types for PDF-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The config is an immutable value that
//! is threaded explicitly through every pipeline stage — never process-wide
//! state — because the output-affecting subset of it is part of the cache
//! fingerprint: two conversions of the same bytes under different configs
//! must land in different cache entries.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::Ocr2MdError;
use crate::progress::ConversionProgressCallback;
use crate::providers::RefinementProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for a PDF-to-Markdown conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use ocr2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .ocr_language("spa")
///     .dpi(300)
///     .refine(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Tesseract language code handed to the OCR engine. Default: "eng".
    ///
    /// Must match a traineddata file the engine has installed ("eng", "spa",
    /// "deu", "eng+spa", …). Mis-matched language models are the single
    /// biggest source of garbage OCR output.
    pub ocr_language: String,

    /// Rendering DPI used when rasterising a page for OCR. Range: 72–600. Default: 300.
    ///
    /// 300 DPI is the resolution tesseract's models were trained around.
    /// Lower values speed up rendering but measurably hurt recognition of
    /// small print; higher values mostly cost memory.
    pub dpi: u32,

    /// Number of pages processed concurrently. Default: 4.
    ///
    /// Classification, extraction, and table detection are page-independent,
    /// so pages fan out; the assembler joins on all of them and merges by
    /// page index, so output never depends on scheduling order.
    pub concurrency: usize,

    /// Extractable-text density (characters per square inch) at or above
    /// which a page is classified `Direct`. Default: 2.0.
    ///
    /// The boundary is inclusive: a page sitting exactly on the threshold is
    /// `Direct`. A full A4/letter text page measures around 20 chars/in², so
    /// 2.0 means "even a sparse but genuine text layer skips OCR".
    pub direct_density: f32,

    /// Density at or below which a page is classified `Ocr`. Default: 0.2.
    ///
    /// Near-zero density is the signature of a scanned page: a handful of
    /// stray glyphs (page number in a text layer, watermark) but no body
    /// text. Between this and `direct_density` the page is `Hybrid`.
    pub ocr_density: f32,

    /// Minimum mean token confidence (0–1) an OCR line needs before it may
    /// replace or fill a line during hybrid reconciliation. Default: 0.6.
    pub hybrid_min_ocr_confidence: f32,

    /// Detect tabular regions and render them as Markdown tables. Default: true.
    pub detect_tables: bool,

    /// Minimum rows for a candidate region to count as a table. Default: 2.
    pub table_min_rows: usize,

    /// Minimum columns for a candidate region to count as a table. Default: 2.
    ///
    /// Together with `table_min_rows` this discards degenerate one-cell
    /// "tables" that layout noise produces constantly.
    pub table_min_columns: usize,

    /// Minimum horizontal gap (points) between column seams. Default: 12.0.
    pub table_column_gap: f32,

    /// Run the LLM refinement pass over each page. Default: false.
    ///
    /// When disabled, refinement is the identity: no provider is constructed
    /// and no network traffic happens.
    pub refine: bool,

    /// Refinement provider name ("openai" or "gemini").
    /// If None along with `provider`, the provider is auto-detected from
    /// `OPENAI_API_KEY` / `GEMINI_API_KEY`.
    pub provider_name: Option<String>,

    /// Model identifier for the refinement provider, e.g. "gpt-4o-mini".
    /// If None, the provider default is used.
    pub model: Option<String>,

    /// Pre-constructed refinement provider. Takes precedence over
    /// `provider_name`. Useful in tests or when the caller needs custom
    /// middleware around the provider.
    pub provider: Option<Arc<dyn RefinementProvider>>,

    /// Language hint forwarded to the refinement prompt ("Spanish",
    /// "English", …). If None, a lightweight stopword heuristic detects it
    /// from the extracted text.
    pub language_hint: Option<String>,

    /// Sampling temperature for the refinement completion. Default: 0.1.
    ///
    /// Low temperature keeps the model faithful to the extracted text, which
    /// is exactly what you want when the instruction is "fix OCR noise
    /// without changing meaning".
    pub temperature: f32,

    /// Maximum tokens the provider may generate per page. Default: 4096.
    pub max_output_tokens: usize,

    /// Maximum retry attempts on a transient provider failure. Default: 3.
    ///
    /// Transient means HTTP 429/5xx, timeouts, connection drops. Permanent
    /// errors (401, 400) are never retried; they fail the page's refinement
    /// immediately and the page falls back to its unrefined text.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// The delay doubles per attempt and carries uniform jitter of up to
    /// half the delay, so concurrent pages retrying against a rate-limited
    /// provider don't stampede it in lock-step.
    pub retry_backoff_ms: u64,

    /// Per-refinement-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Per-page OCR timeout in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom refinement system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Page separator in assembled output. Default: None.
    pub page_separator: PageSeparator,

    /// Include YAML front matter with document metadata. Default: false.
    pub include_metadata: bool,

    /// Progress callback invoked as pages start/complete. Default: none.
    pub progress_callback: Option<Arc<dyn ConversionProgressCallback>>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            ocr_language: "eng".to_string(),
            dpi: 300,
            concurrency: 4,
            direct_density: 2.0,
            ocr_density: 0.2,
            hybrid_min_ocr_confidence: 0.6,
            detect_tables: true,
            table_min_rows: 2,
            table_min_columns: 2,
            table_column_gap: 12.0,
            refine: false,
            provider_name: None,
            model: None,
            provider: None,
            language_hint: None,
            temperature: 0.1,
            max_output_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            ocr_timeout_secs: 60,
            password: None,
            system_prompt: None,
            page_separator: PageSeparator::default(),
            include_metadata: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("ocr_language", &self.ocr_language)
            .field("dpi", &self.dpi)
            .field("concurrency", &self.concurrency)
            .field("direct_density", &self.direct_density)
            .field("ocr_density", &self.ocr_density)
            .field("hybrid_min_ocr_confidence", &self.hybrid_min_ocr_confidence)
            .field("detect_tables", &self.detect_tables)
            .field("refine", &self.refine)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field(
                "provider",
                &self.provider.as_ref().map(|_| "<dyn RefinementProvider>"),
            )
            .field("max_retries", &self.max_retries)
            .field("page_separator", &self.page_separator)
            .field("include_metadata", &self.include_metadata)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Canonical serialisation of every output-affecting field.
    ///
    /// This string is hashed together with the document bytes to form the
    /// cache fingerprint. Invariant: any config change that can alter the
    /// produced Markdown must change this string; fields that only affect
    /// scheduling or reporting (concurrency, timeouts, callbacks) must not.
    /// The leading `v1` tag versions the layout so a future field addition
    /// invalidates old cache entries instead of colliding with them.
    pub(crate) fn fingerprint_material(&self) -> String {
        format!(
            "v1|lang={}|dpi={}|direct={}|ocr={}|hybconf={}|tables={}:{}x{}:{}|\
             refine={}|provider={}|model={}|prompt={}|sep={}|meta={}",
            self.ocr_language,
            self.dpi,
            self.direct_density,
            self.ocr_density,
            self.hybrid_min_ocr_confidence,
            self.detect_tables,
            self.table_min_rows,
            self.table_min_columns,
            self.table_column_gap,
            self.refine,
            // Provider/model only matter while refinement is on; folding them
            // in unconditionally would miss cache hits for refine=false runs.
            if self.refine {
                self.provider_name.as_deref().unwrap_or("auto")
            } else {
                "-"
            },
            if self.refine {
                self.model.as_deref().unwrap_or("default")
            } else {
                "-"
            },
            if self.refine {
                self.system_prompt.as_deref().unwrap_or("builtin")
            } else {
                "-"
            },
            self.page_separator.tag(),
            self.include_metadata,
        )
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn direct_density(mut self, chars_per_sq_in: f32) -> Self {
        self.config.direct_density = chars_per_sq_in.max(0.0);
        self
    }

    pub fn ocr_density(mut self, chars_per_sq_in: f32) -> Self {
        self.config.ocr_density = chars_per_sq_in.max(0.0);
        self
    }

    pub fn hybrid_min_ocr_confidence(mut self, c: f32) -> Self {
        self.config.hybrid_min_ocr_confidence = c.clamp(0.0, 1.0);
        self
    }

    pub fn detect_tables(mut self, v: bool) -> Self {
        self.config.detect_tables = v;
        self
    }

    pub fn table_min_rows(mut self, n: usize) -> Self {
        self.config.table_min_rows = n.max(2);
        self
    }

    pub fn table_min_columns(mut self, n: usize) -> Self {
        self.config.table_min_columns = n.max(2);
        self
    }

    pub fn table_column_gap(mut self, pts: f32) -> Self {
        self.config.table_column_gap = pts.max(1.0);
        self
    }

    pub fn refine(mut self, v: bool) -> Self {
        self.config.refine = v;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn RefinementProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn language_hint(mut self, hint: impl Into<String>) -> Self {
        self.config.language_hint = Some(hint.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn ConversionProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Ocr2MdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(Ocr2MdError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(Ocr2MdError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.ocr_density >= c.direct_density {
            return Err(Ocr2MdError::InvalidConfig(format!(
                "ocr_density ({}) must be below direct_density ({})",
                c.ocr_density, c.direct_density
            )));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(Ocr2MdError::InvalidConfig(
                "ocr_language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to separate pages in the assembled Markdown output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }

    /// Short stable tag used in the fingerprint material.
    pub(crate) fn tag(&self) -> String {
        match self {
            PageSeparator::None => "none".to_string(),
            PageSeparator::HorizontalRule => "hr".to_string(),
            PageSeparator::Comment => "comment".to_string(),
            PageSeparator::Custom(s) => format!("custom:{s}"),
        }
    }
}
