//! System prompts for the LLM refinement pass.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing what the refiner is allowed to
//!    touch requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the prompt directly without
//!    calling a real provider.
//!
//! Callers can override the default via
//! [`crate::config::ConversionConfig::system_prompt`]; the constants here
//! are used only when no override is provided.

/// Default system prompt for refining extracted/OCR'd page text.
///
/// The instruction set is deliberately conservative: the refiner corrects
/// recognition noise and normalises formatting, but must not summarise,
/// reorder, or invent content — the output has to remain a faithful
/// transcription of the page.
pub const DEFAULT_REFINE_PROMPT: &str = r#"You are a text restoration assistant. You receive one page of a document that was extracted from a PDF, possibly via OCR, already in Markdown form.

Follow these rules precisely:

1. CORRECTIONS
   - Fix obvious OCR errors: broken words, swapped characters (l/1, O/0, rn/m), stray ligatures
   - Repair words split across line breaks by hyphenation
   - Normalise spacing and punctuation

2. PRESERVATION
   - Preserve ALL factual content: names, numbers, dates, references must stay exactly as written
   - Keep the page's reading order; never reorder sections
   - Keep existing Markdown structure (headings, lists, emphasis)
   - Keep Markdown tables exactly as they are, cell for cell

3. WHAT NOT TO DO
   - Do NOT summarise, shorten, or expand the content
   - Do NOT translate
   - Do NOT add commentary or explanations
   - Do NOT wrap the output in ```markdown fences

Respond with the corrected page only."#;

/// Build the per-page user preamble carrying the language hint.
///
/// Sent ahead of the page text so the model applies language-appropriate
/// corrections (accents, quote styles) instead of guessing.
pub fn language_context(language: &str) -> String {
    format!("The page is written in {language}. Page content follows:\n\n")
}
