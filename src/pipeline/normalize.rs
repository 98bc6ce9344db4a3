//! Text normalisation: deterministic cleanup of extracted and OCR'd text.
//!
//! OCR engines emit irregular spacing and encoding artefacts constantly —
//! ligature codepoints, smart quotes, duplicated spaces, hard-wrapped
//! paragraphs. Direct extraction is cleaner but still needs line-ending and
//! Unicode normalisation so that the two sources compare meaningfully during
//! hybrid reconciliation. Every rule here is a pure `&str → String` function
//! with no shared state, applied in a defined order.
//!
//! ## Rule order
//!
//! Unicode NFC runs first so later string matches see composed characters;
//! whitespace collapsing runs before paragraph repair so repair sees clean
//! line endings; blank-line collapsing runs last.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Normalise directly extracted text: NFC, line endings, invisible
/// characters, trailing whitespace, excess blank lines.
pub fn normalize_direct(input: &str) -> String {
    let s: String = input.nfc().collect();
    let s = normalize_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s)
}

/// Normalise raw OCR output: everything direct text gets, plus ligature
/// unfolding, quote straightening, and duplicate-space collapsing.
///
/// Line structure is preserved — hybrid reconciliation aligns on physical
/// lines, so nothing here may join or split them.
pub fn normalize_ocr(input: &str) -> String {
    let s: String = input.nfc().collect();
    let s = normalize_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = fix_ocr_characters(&s);
    let s = collapse_spaces(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s)
}

/// Rejoin hard-wrapped lines into paragraphs.
///
/// OCR reproduces the page's physical line breaks; prose wants logical
/// paragraphs. A line is treated as a continuation when it ends without
/// sentence-final punctuation and the next line starts lowercase, or when it
/// ends in a joining character (comma, colon, hyphen). Blank lines remain
/// paragraph boundaries. Applied to OCR page text only — born-digital
/// layouts already chose their breaks on purpose.
pub fn repair_paragraphs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let lines: Vec<&str> = input.lines().collect();

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            // Preserve the paragraph break; avoid piling up blanks.
            if !out.ends_with("\n\n") && !out.is_empty() {
                out.push_str("\n\n");
            }
            continue;
        }

        out.push_str(line.trim_start());

        let joins_forward = {
            let ends_with_joiner = line.ends_with([',', ':', ';', '-']);
            let no_sentence_end = !line.ends_with(['.', '!', '?']);
            let next_starts_lower = lines
                .get(i + 1)
                .map(|n| n.trim_start().chars().next().is_some_and(|c| c.is_lowercase()))
                .unwrap_or(false);
            ends_with_joiner || (no_sentence_end && next_starts_lower)
        };

        if i + 1 < lines.len() {
            if joins_forward {
                // Hyphenated split: join without the hyphen or the space.
                if line.ends_with('-') && !line.ends_with(" -") {
                    out.pop();
                } else {
                    out.push(' ');
                }
            } else {
                out.push('\n');
            }
        }
    }

    collapse_blank_lines(out.trim_end())
}

/// Strip a single outer ```markdown fence wrapping the whole text.
///
/// Refinement providers occasionally wrap their answer in fences despite the
/// prompt saying not to.
pub fn strip_markdown_fences(input: &str) -> String {
    static RE_OUTER_FENCES: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)^```(?:markdown)?\n(.*)\n```\s*$").unwrap());
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Individual rules ─────────────────────────────────────────────────────

fn normalize_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

fn collapse_spaces(input: &str) -> String {
    RE_SPACES.replace_all(input, " ").to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

/// Unfold ligature codepoints and straighten typographic punctuation that
/// OCR engines emit for visually identical glyphs.
fn fix_ocr_characters(input: &str) -> String {
    let mut s = input.to_string();
    const REPLACEMENTS: &[(&str, &str)] = &[
        ("ﬁ", "fi"),
        ("ﬂ", "fl"),
        ("ﬀ", "ff"),
        ("ﬃ", "ffi"),
        ("ﬄ", "ffl"),
        ("\u{2018}", "'"),
        ("\u{2019}", "'"),
        ("\u{201C}", "\""),
        ("\u{201D}", "\""),
        ("\u{2026}", "..."),
    ];
    for (from, to) in REPLACEMENTS {
        s = s.replace(from, to);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_normalises_line_endings_and_invisibles() {
        let input = "a\r\nb\u{200B}c\rd";
        assert_eq!(normalize_direct(input), "a\nbc\nd");
    }

    #[test]
    fn ocr_unfolds_ligatures() {
        assert_eq!(normalize_ocr("ﬁnanza ﬂujo"), "finanza flujo");
    }

    #[test]
    fn ocr_straightens_quotes() {
        assert_eq!(normalize_ocr("\u{201C}hi\u{201D} it\u{2019}s"), "\"hi\" it's");
    }

    #[test]
    fn ocr_collapses_duplicate_spaces_but_keeps_lines() {
        assert_eq!(normalize_ocr("a   b\nc  d"), "a b\nc d");
    }

    #[test]
    fn blank_lines_collapse_to_one_break() {
        assert_eq!(normalize_direct("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn repair_joins_continuation_lines() {
        let input = "The agreement was signed,\nand the parties dispersed.";
        assert_eq!(
            repair_paragraphs(input),
            "The agreement was signed, and the parties dispersed."
        );
    }

    #[test]
    fn repair_joins_hyphenated_split() {
        let input = "a long adminis-\ntration process";
        assert_eq!(repair_paragraphs(input), "a long administration process");
    }

    #[test]
    fn repair_keeps_sentence_breaks() {
        let input = "First sentence.\nSecond sentence.";
        assert_eq!(repair_paragraphs(input), "First sentence.\nSecond sentence.");
    }

    #[test]
    fn repair_keeps_paragraph_breaks() {
        let input = "End of paragraph.\n\nNew paragraph starts here.";
        let out = repair_paragraphs(input);
        assert!(out.contains("paragraph.\n\nNew"));
    }

    #[test]
    fn fences_stripped_with_and_without_language() {
        assert_eq!(strip_markdown_fences("```markdown\n# T\nbody\n```"), "# T\nbody");
        assert_eq!(strip_markdown_fences("```\n# T\n```"), "# T");
        assert_eq!(strip_markdown_fences("# T\nno fences"), "# T\nno fences");
    }
}
