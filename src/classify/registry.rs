//! Typed classifier registry: name → constructor.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{Classifier, ClassifierError, EntropyModel, PathModel, SnippetModel};

/// What constructors may need to build a classifier.
#[derive(Debug, Clone, Default)]
pub struct ModelContext {
    /// Root of downloaded model data.
    pub models_dir: PathBuf,
    /// Extra path substrings for the path classifier.
    pub path_denylist: Vec<String>,
}

pub type Constructor = fn(&ModelContext) -> Result<Box<dyn Classifier>, ClassifierError>;

#[derive(Clone)]
pub struct ModelRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the built-in classifiers.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("path_model", |ctx| Ok(Box::new(PathModel::new(&ctx.path_denylist)?)));
        registry.register("entropy_model", |_| Ok(Box::new(EntropyModel::default())));
        registry.register(super::snippet::NAME, |ctx| Ok(Box::new(SnippetModel::load(&ctx.models_dir)?)));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn build(&self, name: &str, ctx: &ModelContext) -> Result<Box<dyn Classifier>, ClassifierError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ClassifierError::ModelNotFound(name.to_string()))?;
        constructor(ctx)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
