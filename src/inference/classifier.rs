use std::sync::Mutex;

use super::error::{CascadeError, Result};
use super::preprocess::ImageTensor;

/// A trained model mapping an input tensor to one score per class.
///
/// Implementations must be deterministic for a fixed input and must not
/// mutate their parameters. `evaluate` takes `&self` and may be called from
/// several threads at once; backends that cannot allow that implement
/// [`ExclusiveClassifier`] and are wrapped in [`Serialized`].
pub trait Classifier: Send + Sync {
    /// Length of the score vector `evaluate` returns
    fn num_classes(&self) -> usize;

    /// Scores (logits) for `input`, one per class
    fn evaluate(&self, input: &ImageTensor) -> Result<Vec<f32>>;

    /// Short backend name for diagnostics
    fn architecture(&self) -> &str {
        "custom"
    }
}

/// A classifier whose evaluation needs exclusive access, such as a backend
/// that reuses internal scratch buffers or a non-reentrant native session.
pub trait ExclusiveClassifier: Send {
    fn num_classes(&self) -> usize;

    fn evaluate(&mut self, input: &ImageTensor) -> Result<Vec<f32>>;

    fn architecture(&self) -> &str {
        "custom"
    }
}

/// Runs at most one evaluation at a time on the wrapped classifier.
/// Concurrent callers queue on the mutex.
pub struct Serialized<C> {
    inner: Mutex<C>,
    num_classes: usize,
    architecture: String,
}

impl<C: ExclusiveClassifier> Serialized<C> {
    pub fn new(inner: C) -> Self {
        let num_classes = inner.num_classes();
        let architecture = inner.architecture().to_string();
        Self {
            inner: Mutex::new(inner),
            num_classes,
            architecture,
        }
    }
}

impl<C: ExclusiveClassifier> Classifier for Serialized<C> {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn evaluate(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| CascadeError::ModelEvaluation(format!("classifier lock poisoned: {}", e)))?;
        guard.evaluate(input)
    }

    fn architecture(&self) -> &str {
        &self.architecture
    }
}

/// Index of the highest score. Ties resolve to the lowest index.
///
/// # Errors
/// `ModelEvaluation` for an empty vector or one containing NaN, since
/// neither has a meaningful maximum.
pub fn argmax(scores: &[f32]) -> Result<usize> {
    if scores.is_empty() {
        return Err(CascadeError::ModelEvaluation("empty score vector".into()));
    }
    if let Some(pos) = scores.iter().position(|s| s.is_nan()) {
        return Err(CascadeError::ModelEvaluation(format!("score {} is NaN", pos)));
    }

    let mut best = 0;
    for (i, score) in scores.iter().enumerate().skip(1) {
        // Strict comparison keeps the earliest maximum
        if *score > scores[best] {
            best = i;
        }
    }
    Ok(best)
}
