//! OCR engine collaborator: recognise text (with confidences) in a page image.
//!
//! The pipeline depends on the [`OcrEngine`] trait only; the shipped
//! implementation, [`TesseractCli`], shells out to a `tesseract` executable
//! rather than linking the C library — the engine is a runtime dependency,
//! not a build dependency, and a missing binary degrades the affected pages
//! instead of failing the build or the whole document.
//!
//! Tesseract is asked for TSV output, which carries one row per recognised
//! word with its confidence and pixel box. The confidences drive hybrid-page
//! reconciliation; the boxes feed the same table detector that consumes the
//! PDF's own text objects on born-digital pages.

use async_trait::async_trait;
use image::DynamicImage;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors from an OCR engine. Always page-scoped: the caller records them in
/// provenance and moves on.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine could not be invoked at all (binary missing, no exec
    /// permission).
    #[error("OCR engine unavailable: {detail}")]
    Unavailable { detail: String },

    /// The engine ran but recognition failed.
    #[error("OCR failed: {detail}")]
    Failed { detail: String },
}

/// One recognised word with its confidence and pixel-space box.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrToken {
    pub text: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Left edge in pixels of the recognised image.
    pub x: f32,
    /// Top edge in pixels.
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Opaque line identifier: tokens sharing it were printed on one line.
    pub line: (u32, u32, u32),
}

/// The result of recognising one page image.
#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    /// Recognised text, one physical line per `\n`.
    pub text: String,
    /// Per-word tokens, in reading order.
    pub tokens: Vec<OcrToken>,
}

impl OcrOutput {
    /// Mean token confidence, or 0.0 when nothing was recognised.
    pub fn mean_confidence(&self) -> f32 {
        if self.tokens.is_empty() {
            return 0.0;
        }
        self.tokens.iter().map(|t| t.confidence).sum::<f32>() / self.tokens.len() as f32
    }
}

/// Narrow contract over the OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise text in `image`, using the given tesseract-style language
    /// code ("eng", "spa", "eng+spa", …).
    async fn recognize(&self, image: &DynamicImage, language: &str)
        -> Result<OcrOutput, OcrError>;
}

// ── tesseract CLI adapter ────────────────────────────────────────────────

/// [`OcrEngine`] that drives the `tesseract` executable.
pub struct TesseractCli {
    binary: PathBuf,
    /// Page segmentation mode. 3 = fully automatic, tesseract's default and
    /// the right choice for whole pages.
    psm: u8,
    /// OCR engine mode. 3 = default (LSTM where available).
    oem: u8,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            psm: 3,
            oem: 3,
        }
    }
}

impl TesseractCli {
    /// Use a tesseract binary at an explicit path.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    pub fn psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(
        &self,
        image: &DynamicImage,
        language: &str,
    ) -> Result<OcrOutput, OcrError> {
        // tesseract reads from a file; hand it a PNG in a managed tempdir
        // that is cleaned up when this call returns.
        let dir = tempfile::tempdir().map_err(|e| OcrError::Failed {
            detail: format!("tempdir: {e}"),
        })?;
        let png_path = dir.path().join("page.png");
        image
            .save_with_format(&png_path, image::ImageFormat::Png)
            .map_err(|e| OcrError::Failed {
                detail: format!("writing page image: {e}"),
            })?;

        let output = Command::new(&self.binary)
            .arg(&png_path)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("--oem")
            .arg(self.oem.to_string())
            .arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrError::Unavailable {
                        detail: format!("'{}' not found on PATH", self.binary.display()),
                    }
                } else {
                    OcrError::Unavailable {
                        detail: format!("spawning '{}': {e}", self.binary.display()),
                    }
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed {
                detail: format!(
                    "tesseract exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let result = parse_tsv(&tsv);
        debug!(
            "OCR recognised {} tokens, mean confidence {:.2}",
            result.tokens.len(),
            result.mean_confidence()
        );
        Ok(result)
    }
}

/// Parse tesseract TSV output into tokens and line-joined text.
///
/// TSV columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Word rows have level 5; rows with
/// conf -1 are layout containers, not words.
fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut tokens: Vec<OcrToken> = Vec::new();

    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        if cols[0] != "5" {
            continue;
        }
        let conf: f32 = match cols[10].parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        if conf < 0.0 {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }

        let parse_dim = |s: &str| s.parse::<f32>().unwrap_or(0.0);
        let parse_id = |s: &str| s.parse::<u32>().unwrap_or(0);

        tokens.push(OcrToken {
            text: text.to_string(),
            confidence: (conf / 100.0).clamp(0.0, 1.0),
            x: parse_dim(cols[6]),
            y: parse_dim(cols[7]),
            width: parse_dim(cols[8]),
            height: parse_dim(cols[9]),
            line: (parse_id(cols[2]), parse_id(cols[3]), parse_id(cols[4])),
        });
    }

    let text = join_lines(&tokens);
    if tokens.is_empty() {
        warn!("OCR produced no tokens");
    }
    OcrOutput { text, tokens }
}

/// Rebuild physical lines from word tokens: words sharing a line id are
/// space-joined; lines follow token order.
fn join_lines(tokens: &[OcrToken]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current_line: Option<(u32, u32, u32)> = None;

    for token in tokens {
        if current_line != Some(token.line) {
            lines.push(String::new());
            current_line = Some(token.line);
        }
        let line = lines.last_mut().expect("line pushed above");
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&token.text);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
5\t1\t1\t1\t1\t1\t10\t20\t50\t12\t96\tHello\n\
5\t1\t1\t1\t1\t2\t70\t20\t60\t12\t91\tworld\n\
5\t1\t1\t1\t2\t1\t10\t40\t80\t12\t72\tsecond\n\
5\t1\t1\t1\t2\t2\t100\t40\t40\t12\t-1\tghost\n";

    #[test]
    fn parse_tsv_extracts_word_rows() {
        let out = parse_tsv(SAMPLE_TSV);
        assert_eq!(out.tokens.len(), 3, "conf -1 rows must be skipped");
        assert_eq!(out.tokens[0].text, "Hello");
        assert!((out.tokens[0].confidence - 0.96).abs() < 1e-4);
        assert_eq!(out.tokens[2].line, (1, 1, 2));
    }

    #[test]
    fn parse_tsv_joins_lines() {
        let out = parse_tsv(SAMPLE_TSV);
        assert_eq!(out.text, "Hello world\nsecond");
    }

    #[test]
    fn mean_confidence_averages_tokens() {
        let out = parse_tsv(SAMPLE_TSV);
        let expected = (0.96 + 0.91 + 0.72) / 3.0;
        assert!((out.mean_confidence() - expected).abs() < 1e-4);
    }

    #[test]
    fn empty_tsv_is_empty_output() {
        let out = parse_tsv("level\tpage_num\n");
        assert!(out.text.is_empty());
        assert!(out.tokens.is_empty());
        assert_eq!(out.mean_confidence(), 0.0);
    }
}
