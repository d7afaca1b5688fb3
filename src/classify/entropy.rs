//! Shannon entropy and the entropy-floor classifier.

use super::{Classifier, ClassifierError};
use crate::models::Discovery;

/// Bits per byte below which a token does not look like a secret.
pub const DEFAULT_ENTROPY_FLOOR: f64 = 3.0;

/// Calculate the Shannon entropy of a string, in bits per byte.
///
/// Typical values:
/// - English words: ~2.5-3.5 bits
/// - Hex strings: ~3.0-4.0 bits
/// - Base64 strings: ~5.0-6.0 bits
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let len = s.len() as f64;
    let mut freq = [0u32; 256];

    for &byte in s.as_bytes() {
        freq[byte as usize] += 1;
    }

    freq.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Marks a discovery as a false positive when its snippet has no quoted
/// literal and no token reaches the entropy floor.
///
/// `password = get_password()` and `api_key: str` are typical hits.
#[derive(Debug, Clone)]
pub struct EntropyModel {
    floor: f64,
}

impl EntropyModel {
    pub fn new(floor: f64) -> Self {
        Self { floor }
    }
}

impl Default for EntropyModel {
    fn default() -> Self {
        Self::new(DEFAULT_ENTROPY_FLOOR)
    }
}

impl Classifier for EntropyModel {
    fn name(&self) -> &str {
        "entropy_model"
    }

    fn is_false_positive(&self, discovery: &Discovery) -> Result<bool, ClassifierError> {
        let snippet = discovery.snippet.as_str();
        if has_quoted_literal(snippet) {
            return Ok(false);
        }
        let max = tokens(snippet).map(shannon_entropy).fold(0.0, f64::max);
        Ok(max < self.floor)
    }
}

/// Token characters cover identifiers plus base64 and hex alphabets.
fn tokens(snippet: &str) -> impl Iterator<Item = &str> {
    snippet
        .split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-')))
        .filter(|t| !t.is_empty())
}

fn has_quoted_literal(snippet: &str) -> bool {
    ['"', '\'', '`'].iter().any(|&q| {
        let mut parts = snippet.split(q);
        parts.next();
        // a non-empty run followed by a closing quote
        matches!((parts.next(), parts.next()), (Some(inner), Some(_)) if !inner.is_empty())
    })
}
