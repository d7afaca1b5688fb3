//! Ordered classifier chain with per-discovery short-circuit.

use tracing::{debug, warn};

use super::registry::{ModelContext, ModelRegistry};
use super::Classifier;
use crate::models::{Discovery, DiscoveryState};

#[derive(Default)]
pub struct ClassifierChain {
    classifiers: Vec<Box<dyn Classifier>>,
}

impl ClassifierChain {
    pub fn new(classifiers: Vec<Box<dyn Classifier>>) -> Self {
        Self { classifiers }
    }

    /// Build classifiers in the order given, dropping repeated names.
    /// Names that fail to resolve or load are logged and skipped.
    pub fn from_names(registry: &ModelRegistry, names: &[String], ctx: &ModelContext) -> Self {
        let mut classifiers: Vec<Box<dyn Classifier>> = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for name in names {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);
            match registry.build(name, ctx) {
                Ok(classifier) => classifiers.push(classifier),
                Err(e) => warn!(model = name.as_str(), error = %e, "skipping classifier"),
            }
        }
        Self { classifiers }
    }

    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.classifiers.iter().map(|c| c.name()).collect()
    }

    /// Ids of the discoveries judged false positive. Discoveries not in
    /// state `new` are skipped; classifier errors are logged and the next
    /// classifier is tried.
    pub fn classify(&self, discoveries: &[Discovery]) -> Vec<i64> {
        let mut flagged = Vec::new();
        for discovery in discoveries {
            if discovery.state != DiscoveryState::New {
                continue;
            }
            for classifier in &self.classifiers {
                match classifier.is_false_positive(discovery) {
                    Ok(true) => {
                        debug!(id = discovery.id, model = classifier.name(), "false positive");
                        flagged.push(discovery.id);
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(id = discovery.id, model = classifier.name(), error = %e, "classifier failed");
                    }
                }
            }
        }
        flagged
    }
}
