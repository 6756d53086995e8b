use std::fmt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::catalog::{Catalog, Domain};
use super::classifier::{argmax, Classifier};
use super::error::{CascadeError, Result};
use super::preprocess::{ImageTensor, Preprocessor};
use super::registry::{ModelDetails, ModelRegistry};

/// Hierarchical label for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Domain picked by the router
    pub domain: Domain,
    /// Router output index of `domain`
    pub domain_index: usize,
    /// Output index of the domain model
    pub class_index: usize,
    /// Catalog name for `class_index`
    pub class_name: String,
}

/// Where a request is in the cascade. Requests only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestStage {
    Received,
    Preprocessed,
    DomainResolved,
    Classified,
    Completed,
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStage::Received => "received",
            RequestStage::Preprocessed => "preprocessed",
            RequestStage::DomainResolved => "domain_resolved",
            RequestStage::Classified => "classified",
            RequestStage::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Runs the two-stage cascade: preprocess, route, classify within the domain.
///
/// The engine owns the registry and holds no per-request state, so one
/// instance is shared across threads behind an `Arc`.
pub struct CascadeEngine {
    registry: ModelRegistry,
    preprocessor: Preprocessor,
}

impl CascadeEngine {
    pub fn new(registry: ModelRegistry, preprocessor: Preprocessor) -> Self {
        Self { registry, preprocessor }
    }

    /// Classifies one encoded image.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Encoded image (PNG, JPEG, ...)
    ///
    /// # Returns
    ///
    /// The router's domain and the domain model's class. Errors from any
    /// stage are returned unchanged; nothing is retried and there is no
    /// fallback domain.
    pub fn classify(&self, bytes: &[u8]) -> Result<Classification> {
        let mut stage = RequestStage::Received;
        debug!(stage = %stage, bytes = bytes.len(), "Classification request");

        let result = self.run(bytes, &mut stage);
        if let Err(e) = &result {
            warn!(stage = %stage, error = %e, "Classification failed");
        }
        result
    }

    fn run(&self, bytes: &[u8], stage: &mut RequestStage) -> Result<Classification> {
        let tensor = self.preprocessor.preprocess(bytes)?;
        advance(stage, RequestStage::Preprocessed);

        let catalog = self.registry.catalog();
        let domain_scores = evaluate_checked(self.registry.router(), &tensor, catalog.len(), "router")?;
        let domain_index = argmax(&domain_scores)?;
        let domain = self.registry.domain_at(domain_index)?;
        advance(stage, RequestStage::DomainResolved);
        debug!(%domain, domain_index, "Routed");

        let classes = catalog.classes(domain)?;
        let class_scores = evaluate_checked(self.registry.for_domain(domain)?, &tensor, classes.len(), domain.as_str())?;
        let class_index = argmax(&class_scores)?;
        let class_name = classes
            .get(class_index)
            .cloned()
            .ok_or_else(|| CascadeError::ModelEvaluation(format!("class index {} outside {} catalog", class_index, domain)))?;
        advance(stage, RequestStage::Classified);

        let classification = Classification {
            domain,
            domain_index,
            class_index,
            class_name,
        };
        advance(stage, RequestStage::Completed);
        debug!(?classification, "Classification complete");
        Ok(classification)
    }

    pub fn catalog(&self) -> &Catalog {
        self.registry.catalog()
    }

    pub fn models(&self) -> &[ModelDetails] {
        self.registry.details()
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }
}

fn advance(stage: &mut RequestStage, next: RequestStage) {
    debug!(from = %stage, to = %next, "Request stage");
    *stage = next;
}

/// Evaluates and checks the score vector has the length its catalog requires
fn evaluate_checked(
    classifier: &dyn Classifier,
    tensor: &ImageTensor,
    expected: usize,
    label: &str,
) -> Result<Vec<f32>> {
    let scores = classifier.evaluate(tensor)?;
    if scores.len() != expected {
        return Err(CascadeError::ModelEvaluation(format!(
            "{} returned {} scores, expected {}",
            label,
            scores.len(),
            expected
        )));
    }
    Ok(scores)
}
