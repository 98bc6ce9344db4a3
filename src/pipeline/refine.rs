//! LLM refinement: best-effort cleanup of extracted page text.
//!
//! This stage is optional and never load-bearing. When it succeeds, the
//! page's Markdown gets OCR-noise corrections and normalised prose; when it
//! fails — permanently, or after the transient-retry budget — the caller
//! falls back to the unrefined text and flags the page in provenance.
//! Refinement can make a conversion better; it can never make one fail.
//!
//! ## Retry strategy
//!
//! Transient provider errors (429, 5xx, timeouts) retry up to
//! `config.max_retries` times with exponential backoff
//! (`retry_backoff_ms × 2^(attempt−1)`) plus uniform jitter of up to half
//! the delay. The jitter matters: pages refine concurrently, and without it
//! every page that hit the same 429 would retry in the same instant and hit
//! it again. A server-supplied `Retry-After` overrides the computed delay
//! when it is longer. Permanent errors never retry.

use crate::config::ConversionConfig;
use crate::error::PageError;
use crate::pipeline::normalize;
use crate::prompts::{language_context, DEFAULT_REFINE_PROMPT};
use crate::providers::{CompletionOptions, ProviderError, RefinementProvider};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Refine one page's Markdown through the provider.
///
/// Returns the refined text, fence-stripped. Errors are already classified:
/// a `PageError` here means refinement is over for this page and the caller
/// should fall back to the input text.
pub async fn refine_page(
    provider: &Arc<dyn RefinementProvider>,
    page_index: usize,
    body: &str,
    config: &ConversionConfig,
) -> Result<String, PageError> {
    let page_num = page_index + 1;
    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_REFINE_PROMPT);

    let language = config
        .language_hint
        .clone()
        .unwrap_or_else(|| detect_language(body).to_string());
    let user_text = format!("{}{}", language_context(&language), body);

    let options = CompletionOptions {
        temperature: config.temperature,
        max_tokens: config.max_output_tokens,
    };
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_detail: Option<String> = None;
    let mut server_retry_after: Option<u64> = None;
    let mut timed_out_every_attempt = true;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let mut delay_ms = backoff_delay_ms(config.retry_backoff_ms, attempt);
            if let Some(secs) = server_retry_after.take() {
                delay_ms = delay_ms.max(secs * 1000);
            }
            delay_ms += jitter_ms(delay_ms);
            warn!(
                "Page {}: refinement retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, delay_ms
            );
            sleep(Duration::from_millis(delay_ms)).await;
        }

        match timeout(call_timeout, provider.complete(system_prompt, &user_text, &options)).await {
            Ok(Ok(refined)) => {
                debug!(
                    "Page {}: refined on attempt {} ({} chars)",
                    page_num,
                    attempt + 1,
                    refined.len()
                );
                return Ok(normalize::strip_markdown_fences(&refined));
            }
            Ok(Err(ProviderError::Transient {
                detail,
                retry_after_secs,
            })) => {
                timed_out_every_attempt = false;
                warn!("Page {}: transient provider error — {}", page_num, detail);
                last_detail = Some(detail);
                server_retry_after = retry_after_secs;
            }
            Ok(Err(ProviderError::Permanent { detail })) => {
                warn!("Page {}: permanent provider error — {}", page_num, detail);
                return Err(PageError::RefinementFailed {
                    page: page_num,
                    retries: attempt,
                    detail,
                });
            }
            Err(_) => {
                warn!(
                    "Page {}: refinement call exceeded {}s",
                    page_num, config.api_timeout_secs
                );
                last_detail = Some(format!("timed out after {}s", config.api_timeout_secs));
            }
        }
    }

    if timed_out_every_attempt && last_detail.is_some() {
        return Err(PageError::RefinementTimeout {
            page: page_num,
            secs: config.api_timeout_secs,
        });
    }

    Err(PageError::RefinementFailed {
        page: page_num,
        retries: config.max_retries,
        detail: last_detail.unwrap_or_else(|| "unknown provider error".to_string()),
    })
}

/// Exponential backoff without jitter: `base × 2^(attempt−1)`.
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Uniform jitter in `[0, delay/2]`.
fn jitter_ms(delay_ms: u64) -> u64 {
    if delay_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=delay_ms / 2)
}

// ── Language detection ───────────────────────────────────────────────────

/// Guess the page's language for the refinement prompt.
///
/// Counts high-frequency function words for Spanish and English and picks
/// the larger ratio; ties fall back to an accented-character check. Good
/// enough for a prompt hint — a wrong guess degrades phrasing, not content.
pub fn detect_language(text: &str) -> &'static str {
    const SPANISH: &[&str] = &[
        "el", "la", "los", "las", "un", "una", "y", "o", "pero", "porque", "como", "que",
        "cuando", "del", "al", "es", "son", "está", "para", "por",
    ];
    const ENGLISH: &[&str] = &[
        "the", "a", "an", "and", "or", "but", "because", "as", "that", "when", "is", "are",
        "be", "to", "for", "with", "by", "of", "in", "on",
    ];

    let mut spanish_hits = 0usize;
    let mut english_hits = 0usize;
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != 'á' && c != 'é' && c != 'í' && c != 'ó' && c != 'ú' && c != 'ñ')
    {
        let w = word.to_lowercase();
        if w.is_empty() {
            continue;
        }
        if SPANISH.contains(&w.as_str()) {
            spanish_hits += 1;
        }
        if ENGLISH.contains(&w.as_str()) {
            english_hits += 1;
        }
    }

    if spanish_hits > english_hits {
        "Spanish"
    } else if english_hits > spanish_hits {
        "English"
    } else if text.chars().any(|c| "áéíóúüñ¿¡".contains(c)) {
        "Spanish"
    } else {
        "English"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay_ms(500, 1), 500);
        assert_eq!(backoff_delay_ms(500, 2), 1000);
        assert_eq!(backoff_delay_ms(500, 3), 2000);
    }

    #[test]
    fn jitter_bounded_by_half_delay() {
        for _ in 0..100 {
            assert!(jitter_ms(1000) <= 500);
        }
        assert_eq!(jitter_ms(0), 0);
    }

    #[test]
    fn detects_spanish() {
        let text = "El tribunal resolvió que la demanda era admisible porque los plazos";
        assert_eq!(detect_language(text), "Spanish");
    }

    #[test]
    fn detects_english() {
        let text = "The court held that the claim was admissible because the deadlines";
        assert_eq!(detect_language(text), "English");
    }

    #[test]
    fn accents_break_ties() {
        assert_eq!(detect_language("¡Años!"), "Spanish");
    }

    struct FailingProvider {
        calls: AtomicU32,
        permanent: bool,
    }

    #[async_trait]
    impl RefinementProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _system: &str,
            _text: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                Err(ProviderError::Permanent {
                    detail: "HTTP 401: bad key".into(),
                })
            } else {
                Err(ProviderError::Transient {
                    detail: "HTTP 503".into(),
                    retry_after_secs: None,
                })
            }
        }
    }

    fn fast_config() -> ConversionConfig {
        ConversionConfig::builder()
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn permanent_error_fails_without_retry() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicU32::new(0),
            permanent: true,
        });
        let as_dyn: Arc<dyn RefinementProvider> = provider.clone();
        let err = refine_page(&as_dyn, 0, "text", &fast_config())
            .await
            .expect_err("permanent error must fail");
        assert!(matches!(err, PageError::RefinementFailed { retries: 0, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1, "no retries");
    }

    #[tokio::test]
    async fn transient_errors_exhaust_budget() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicU32::new(0),
            permanent: false,
        });
        let as_dyn: Arc<dyn RefinementProvider> = provider.clone();
        let err = refine_page(&as_dyn, 2, "text", &fast_config())
            .await
            .expect_err("transient errors must exhaust the budget");
        assert!(matches!(err, PageError::RefinementFailed { retries: 2, .. }));
        // initial attempt + 2 retries
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    struct EchoProvider;

    #[async_trait]
    impl RefinementProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            _system: &str,
            _text: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            Ok("```markdown\n# refined\n```".to_string())
        }
    }

    #[tokio::test]
    async fn success_strips_fences() {
        let provider: Arc<dyn RefinementProvider> = Arc::new(EchoProvider);
        let refined = refine_page(&provider, 0, "# raw", &fast_config())
            .await
            .unwrap();
        assert_eq!(refined, "# refined");
    }
}
