//! Refinement providers: a small closed set of LLM backends behind one trait.
//!
//! The pipeline's refinement stage needs exactly one capability — "complete
//! this text under these instructions" — so that is the whole trait. The
//! provider is chosen once at composition time (explicit name, pre-built
//! instance, or environment auto-detection) and passed through the config;
//! no stage inspects provider types at runtime.
//!
//! ## Transient vs permanent
//!
//! Every failure is classified at the adapter boundary: rate limits,
//! server-side 5xx, timeouts and connection drops are [`ProviderError::
//! Transient`] and eligible for retry; authentication and malformed-request
//! failures are [`ProviderError::Permanent`] and fail the page's refinement
//! immediately. The retry loop in [`crate::pipeline::refine`] only ever sees
//! these two categories, never raw HTTP.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::error::Ocr2MdError;

/// A provider failure, pre-classified for the retry loop.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Worth retrying: rate limit, overloaded backend, network blip.
    #[error("transient provider error: {detail}")]
    Transient {
        detail: String,
        /// Server-requested delay in seconds (from `Retry-After`), if any.
        retry_after_secs: Option<u64>,
    },

    /// Not worth retrying: bad credentials, malformed request, unknown model.
    #[error("permanent provider error: {detail}")]
    Permanent { detail: String },
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

/// Sampling knobs forwarded to the provider per call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

/// The one capability the refinement stage needs from an LLM backend.
#[async_trait]
pub trait RefinementProvider: Send + Sync {
    /// Short identifier used in logs and provenance ("openai", "gemini").
    fn name(&self) -> &str;

    /// Complete `text` under `system_prompt` and return the model's output.
    async fn complete(
        &self,
        system_prompt: &str,
        text: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;
}

/// Map an HTTP status to the transient/permanent split.
///
/// 429 and all 5xx are transient; everything else that is an error is
/// permanent. 408 (request timeout) is the one 4xx worth retrying.
fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ProviderError::Transient {
            detail: format!("HTTP {status}: {}", truncate(body, 200)),
            retry_after_secs: None,
        }
    } else {
        ProviderError::Permanent {
            detail: format!("HTTP {status}: {}", truncate(body, 200)),
        }
    }
}

/// Map a reqwest transport error (no HTTP response) onto the split.
fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ProviderError::Transient {
            detail: e.to_string(),
            retry_after_secs: None,
        }
    } else {
        ProviderError::Permanent {
            detail: e.to_string(),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

// ── OpenAI ───────────────────────────────────────────────────────────────

/// OpenAI chat-completions backend.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(api_key: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.unwrap_or(Self::DEFAULT_MODEL).to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Point the adapter at a non-default endpoint (proxies, test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl RefinementProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        text: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": text },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let mut err = classify_status(status, &body);
            if let ProviderError::Transient {
                retry_after_secs, ..
            } = &mut err
            {
                *retry_after_secs = retry;
            }
            return Err(err);
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            // A 200 with an unparseable body means the request shape is
            // wrong, not that the backend hiccuped.
            ProviderError::Permanent {
                detail: format!("malformed completion response: {e}"),
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Permanent {
                detail: "completion response contained no choices".into(),
            })?;
        debug!("openai returned {} chars", content.len());
        Ok(content)
    }
}

// ── Gemini ───────────────────────────────────────────────────────────────

/// Google Gemini generateContent backend.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";

    pub fn new(api_key: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.unwrap_or(Self::DEFAULT_MODEL).to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: String,
}

#[async_trait]
impl RefinementProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        text: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "system_instruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_tokens,
            },
        });

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let mut err = classify_status(status, &body);
            if let ProviderError::Transient {
                retry_after_secs, ..
            } = &mut err
            {
                *retry_after_secs = retry;
            }
            return Err(err);
        }

        let parsed: GeminiResponse =
            response.json().await.map_err(|e| ProviderError::Permanent {
                detail: format!("malformed generateContent response: {e}"),
            })?;

        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| ProviderError::Permanent {
                detail: "generateContent response contained no candidates".into(),
            })?;
        debug!("gemini returned {} chars", content.len());
        Ok(content)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────

/// Instantiate a named provider, reading its API key from the environment.
pub fn create_provider(
    name: &str,
    model: Option<&str>,
) -> Result<Arc<dyn RefinementProvider>, Ocr2MdError> {
    match name {
        "openai" => {
            let key = non_empty_env("OPENAI_API_KEY").ok_or_else(|| {
                Ocr2MdError::ProviderNotConfigured {
                    provider: "openai".into(),
                    hint: "Set OPENAI_API_KEY in the environment.".into(),
                }
            })?;
            Ok(Arc::new(OpenAiProvider::new(key, model)))
        }
        "gemini" => {
            let key = non_empty_env("GEMINI_API_KEY").ok_or_else(|| {
                Ocr2MdError::ProviderNotConfigured {
                    provider: "gemini".into(),
                    hint: "Set GEMINI_API_KEY in the environment.".into(),
                }
            })?;
            Ok(Arc::new(GeminiProvider::new(key, model)))
        }
        other => Err(Ocr2MdError::ProviderNotConfigured {
            provider: other.to_string(),
            hint: "Known providers: openai, gemini.".into(),
        }),
    }
}

/// Auto-detect a provider from the environment: OpenAI first, then Gemini.
///
/// The ordering matches the explicit-key preference users expect when both
/// keys are present; name a provider in the config to override it.
pub fn provider_from_env(
    model: Option<&str>,
) -> Result<Arc<dyn RefinementProvider>, Ocr2MdError> {
    if non_empty_env("OPENAI_API_KEY").is_some() {
        return create_provider("openai", model);
    }
    if non_empty_env("GEMINI_API_KEY").is_some() {
        return create_provider("gemini", model);
    }
    Err(Ocr2MdError::ProviderNotConfigured {
        provider: "auto".into(),
        hint: "No provider auto-detected.\nSet OPENAI_API_KEY or GEMINI_API_KEY, or pass a pre-built provider.".into(),
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
