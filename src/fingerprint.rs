//! Content fingerprinting: the cache key for a document + config pair.
//!
//! The fingerprint is a SHA-256 digest over the raw file bytes followed by a
//! canonical serialisation of every output-affecting configuration field
//! (see [`ConversionConfig::fingerprint_material`]). Identical bytes under
//! an identical config always hash to the same value — across calls and
//! across process restarts — and any config change that could alter the
//! produced Markdown changes the key. That determinism is what makes the
//! cache's "first store wins" rule sound.
//!
//! SHA-256 is not here for secrecy; it is here because accidental collisions
//! must be practically impossible for cache correctness, and a 256-bit
//! digest buys that outright.

use crate::config::ConversionConfig;
use crate::error::Ocr2MdError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// An immutable, content-derived cache key.
///
/// Constructed only through [`fingerprint`]; the inner hex string is
/// append-only state nobody mutates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentFingerprint(String);

impl DocumentFingerprint {
    /// The 64-char lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint for a document + configuration pair.
///
/// Pure and deterministic. The config material is length-prefixed before
/// hashing so `bytes || material` cannot be confused with a different split
/// of the same concatenation.
///
/// # Errors
/// [`Ocr2MdError::EmptyInput`] when `bytes` is empty — an empty document has
/// no meaningful identity and would otherwise alias every other empty input.
pub fn fingerprint(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<DocumentFingerprint, Ocr2MdError> {
    if bytes.is_empty() {
        return Err(Ocr2MdError::EmptyInput);
    }

    let material = config.fingerprint_material();

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.update((material.len() as u64).to_le_bytes());
    hasher.update(material.as_bytes());

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }

    Ok(DocumentFingerprint(hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_identical_fingerprint() {
        let config = ConversionConfig::default();
        let a = fingerprint(b"%PDF-1.7 content", &config).unwrap();
        let b = fingerprint(b"%PDF-1.7 content", &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn different_bytes_different_fingerprint() {
        let config = ConversionConfig::default();
        let a = fingerprint(b"%PDF-1.7 aaa", &config).unwrap();
        let b = fingerprint(b"%PDF-1.7 bbb", &config).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn config_change_changes_fingerprint() {
        let base = ConversionConfig::default();
        let spa = ConversionConfig::builder()
            .ocr_language("spa")
            .build()
            .unwrap();
        let a = fingerprint(b"%PDF-1.7 content", &base).unwrap();
        let b = fingerprint(b"%PDF-1.7 content", &spa).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn table_toggle_changes_fingerprint() {
        let on = ConversionConfig::default();
        let off = ConversionConfig::builder()
            .detect_tables(false)
            .build()
            .unwrap();
        let a = fingerprint(b"%PDF-1.7 content", &on).unwrap();
        let b = fingerprint(b"%PDF-1.7 content", &off).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_input_rejected() {
        let config = ConversionConfig::default();
        assert!(matches!(
            fingerprint(b"", &config),
            Err(Ocr2MdError::EmptyInput)
        ));
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let config = ConversionConfig::default();
        let fp = fingerprint(b"%PDF-1.7 x", &config).unwrap();
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
