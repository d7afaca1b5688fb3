//! False-positive classifiers.
//!
//! A [`Classifier`] is a predicate over a stored discovery. Classifiers are
//! resolved by name through a [`ModelRegistry`] and run in order by a
//! [`ClassifierChain`]. A discovery judged a false positive by any
//! classifier moves to `false_positive` and is not shown to the rest of
//! the chain.

pub mod chain;
pub mod entropy;
pub mod path;
pub mod registry;
pub mod snippet;

use std::path::PathBuf;

use thiserror::Error;

use crate::models::Discovery;

pub use chain::ClassifierChain;
pub use entropy::{EntropyModel, shannon_entropy};
pub use path::PathModel;
pub use registry::{ModelContext, ModelRegistry};
pub use snippet::SnippetModel;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("unknown model '{0}'")]
    ModelNotFound(String),

    #[error("model '{name}' has no data at {path} (try `secretsweep download {name}`)")]
    MissingData { name: String, path: PathBuf },

    #[error("model '{name}' has invalid data: {reason}")]
    InvalidData { name: String, reason: String },

    #[error("model '{name}' failed: {reason}")]
    Inference { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decides whether a discovery is a false positive.
pub trait Classifier: Send + Sync {
    /// Registry name of the classifier.
    fn name(&self) -> &str;

    fn is_false_positive(&self, discovery: &Discovery) -> Result<bool, ClassifierError>;
}
