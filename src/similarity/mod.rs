//! Snippet embeddings and cosine similarity.
//!
//! The default embedder is [`HashingEmbedder`]: signed feature hashing of
//! character trigrams, deterministic and dependency-free at runtime. With
//! the `fastembed` feature, [`FastEmbedder`] provides ONNX sentence
//! embeddings instead.

#[cfg(feature = "fastembed")]
mod fast;

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use crate::constants::MIN_SIMILARITY_THRESHOLD;

#[cfg(feature = "fastembed")]
pub use fast::FastEmbedder;

/// Dimension of the default hashing embedder.
pub const DEFAULT_DIMENSIONS: usize = 256;

#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("embedding failed: {0}")]
    Embed(String),

    #[error("threshold {0} is outside the calibrated range [{1}, 1]")]
    Threshold(f32, f32),
}

/// Maps text to a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, SimilarityError>;
}

/// Signed feature hashing over lowercased character trigrams, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let chars: Vec<char> = format!("  {} ", text.trim().to_lowercase()).chars().collect();
        let mut buf = [0u8; 12];
        for gram in chars.windows(3) {
            let mut len = 0;
            for c in gram {
                len += c.encode_utf8(&mut buf[len..]).len();
            }
            let h = xxh3_64(&buf[..len]);
            let slot = (h % self.dimensions as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, SimilarityError> {
        Ok(self.vectorize(text))
    }
}

/// Refuse thresholds below the range the embedders are calibrated for.
pub fn validate_threshold(threshold: f32) -> Result<f32, SimilarityError> {
    if (MIN_SIMILARITY_THRESHOLD..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(SimilarityError::Threshold(threshold, MIN_SIMILARITY_THRESHOLD))
    }
}

/// Cosine similarity; `0.0` for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_is_maximally_similar() {
        let e = HashingEmbedder::default();
        let a = e.vectorize("password = 'hunter2'");
        let b = e.vectorize("  PASSWORD = 'hunter2'  ");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn near_duplicates_beat_unrelated_text() {
        let e = HashingEmbedder::default();
        let target = e.vectorize("db_password = os.environ['DB_PASSWORD']");
        let near = e.vectorize("db_password = os.environ['DB_PASSWORD2']");
        let far = e.vectorize("aws_access_key_id: AKIA0000");
        assert!(cosine_similarity(&target, &near) > cosine_similarity(&target, &far));
    }

    #[test]
    fn vectors_are_unit_length() {
        let v = HashingEmbedder::new(64).vectorize("token");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(v.len(), 64);
    }

    #[test]
    fn thresholds_below_calibration_are_refused() {
        assert!(validate_threshold(0.96).is_ok());
        assert!(validate_threshold(0.94).is_ok());
        assert!(validate_threshold(0.5).is_err());
        assert!(validate_threshold(1.5).is_err());
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
