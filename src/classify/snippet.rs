//! Learned snippet classifier.
//!
//! A logistic model over hashed character trigrams of the snippet. The
//! weights live in `<models dir>/snippet_model/weights.json` and are
//! fetched with `secretsweep download snippet_model`.

use std::path::Path;

use serde::Deserialize;

use super::{Classifier, ClassifierError};
use crate::models::Discovery;
use crate::similarity::HashingEmbedder;

pub const NAME: &str = "snippet_model";
pub const WEIGHTS_FILE: &str = "weights.json";

#[derive(Debug, Clone, Deserialize)]
struct Weights {
    bias: f32,
    weights: Vec<f32>,
    #[serde(default = "default_threshold")]
    threshold: f32,
}

fn default_threshold() -> f32 {
    0.5
}

#[derive(Debug, Clone)]
pub struct SnippetModel {
    features: HashingEmbedder,
    bias: f32,
    weights: Vec<f32>,
    threshold: f32,
}

impl SnippetModel {
    /// Load weights from `<models_dir>/snippet_model/weights.json`.
    pub fn load(models_dir: &Path) -> Result<Self, ClassifierError> {
        let path = models_dir.join(NAME).join(WEIGHTS_FILE);
        if !path.is_file() {
            return Err(ClassifierError::MissingData {
                name: NAME.to_string(),
                path,
            });
        }
        let content = std::fs::read_to_string(&path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ClassifierError> {
        let invalid = |reason: String| ClassifierError::InvalidData {
            name: NAME.to_string(),
            reason,
        };
        let w: Weights = serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
        if w.weights.is_empty() {
            return Err(invalid("empty weight vector".to_string()));
        }
        if !(0.0..=1.0).contains(&w.threshold) {
            return Err(invalid(format!("threshold {} outside [0, 1]", w.threshold)));
        }
        Ok(Self {
            features: HashingEmbedder::new(w.weights.len()),
            bias: w.bias,
            weights: w.weights,
            threshold: w.threshold,
        })
    }

    /// Probability that the snippet is a false positive.
    pub fn score(&self, snippet: &str) -> f32 {
        let x = self.features.vectorize(snippet);
        let z = self.bias + x.iter().zip(&self.weights).map(|(a, b)| a * b).sum::<f32>();
        1.0 / (1.0 + (-z).exp())
    }
}

impl Classifier for SnippetModel {
    fn name(&self) -> &str {
        NAME
    }

    fn is_false_positive(&self, discovery: &Discovery) -> Result<bool, ClassifierError> {
        let p = self.score(&discovery.snippet);
        if p.is_nan() {
            return Err(ClassifierError::Inference {
                name: NAME.to_string(),
                reason: "score is NaN".to_string(),
            });
        }
        Ok(p >= self.threshold)
    }
}
