use std::sync::Mutex;

use super::{Embedder, SimilarityError};

/// Sentence embeddings from the default fastembed model.
pub struct FastEmbedder {
    model: Mutex<fastembed::TextEmbedding>,
    dimensions: usize,
}

impl FastEmbedder {
    pub fn new() -> Result<Self, SimilarityError> {
        let mut model = fastembed::TextEmbedding::try_new(Default::default())
            .map_err(|e| SimilarityError::Unavailable(e.to_string()))?;
        let sample = model
            .embed(vec!["password = ''"], None)
            .map_err(|e| SimilarityError::Embed(e.to_string()))?;
        let dimensions = sample.first().map_or(0, Vec::len);
        Ok(Self {
            model: Mutex::new(model),
            dimensions,
        })
    }
}

impl Embedder for FastEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, SimilarityError> {
        let mut model = self.model.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = model
            .embed(vec![text], None)
            .map_err(|e| SimilarityError::Embed(e.to_string()))?;
        out.pop()
            .ok_or_else(|| SimilarityError::Embed("model returned no vector".to_string()))
    }
}
