//! Per-page classification: direct extraction, OCR, or both.
//!
//! The classifier looks at one number — extractable-text density in
//! characters per square inch — plus the presence of image objects, and
//! sorts each page into one of three strategies:
//!
//! * **Direct** — a real text layer exists; OCR would only add noise.
//! * **Ocr** — essentially no text layer; the page is a picture of text.
//! * **Hybrid** — a partial text layer (scanned page with a patchy OCR
//!   layer already embedded, or mixed text + figures); both sources are
//!   extracted and reconciled line-by-line downstream.
//!
//! Thresholds come from configuration, never constants: documents differ
//! too much (invoices vs. novels) for one hard-coded band to fit.
//!
//! Two fixed rules:
//! * The `direct_density` boundary is **inclusive** — a page sitting exactly
//!   on it is `Direct`, so repeated runs of a borderline page never flap.
//! * A page with zero glyphs *and* zero images is blank; it classifies
//!   `Direct` with empty text rather than wasting an OCR call on nothing.

use crate::config::ConversionConfig;
use crate::output::PageClassification;
use crate::source::PageProbe;
use tracing::debug;

/// The classifier's verdict for one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub classification: PageClassification,
    /// Confidence in [0, 1]: 0.5 at a band edge, rising toward 1.0 deep
    /// inside a band.
    pub confidence: f32,
}

/// Classify a page from its probe measurements.
pub fn classify(probe: &PageProbe, config: &ConversionConfig) -> Decision {
    let lo = config.ocr_density;
    let hi = config.direct_density;
    let density = probe.density();

    // Blank page: nothing to extract, nothing to recognise.
    if probe.char_count == 0 && probe.image_count == 0 {
        return Decision {
            classification: PageClassification::Direct,
            confidence: 1.0,
        };
    }

    let decision = if density >= hi {
        Decision {
            classification: PageClassification::Direct,
            confidence: band_confidence_above(density, hi),
        }
    } else if density <= lo {
        Decision {
            classification: PageClassification::Ocr,
            confidence: band_confidence_below(density, lo),
        }
    } else {
        Decision {
            classification: PageClassification::Hybrid,
            confidence: band_confidence_between(density, lo, hi),
        }
    };

    debug!(
        "density {:.3} chars/in² → {} (confidence {:.2})",
        density,
        decision.classification.label(),
        decision.confidence
    );
    decision
}

/// Confidence for the Direct band: 0.5 on the threshold, saturating at 1.0
/// once density reaches twice the threshold.
fn band_confidence_above(density: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 1.0;
    }
    let excess = ((density - threshold) / threshold).clamp(0.0, 1.0);
    0.5 + 0.5 * excess
}

/// Confidence for the Ocr band: 1.0 at zero density, 0.5 on the threshold.
fn band_confidence_below(density: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 1.0;
    }
    let depth = ((threshold - density) / threshold).clamp(0.0, 1.0);
    0.5 + 0.5 * depth
}

/// Confidence for the Hybrid band: 1.0 at the band centre, 0.5 at either edge.
fn band_confidence_between(density: f32, lo: f32, hi: f32) -> f32 {
    let half_width = (hi - lo) / 2.0;
    if half_width <= 0.0 {
        return 0.5;
    }
    let mid = (lo + hi) / 2.0;
    let centrality = (1.0 - (density - mid).abs() / half_width).clamp(0.0, 1.0);
    0.5 + 0.5 * centrality
}
