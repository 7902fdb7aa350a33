//! Classifier trait and softmax helpers
//!
//! A classifier is split in two halves so the saliency explainer can hook
//! the boundary: `features` produces the last convolutional feature map and
//! `head` turns that map into logits. `forward` is simply the composition.

use candle_core::{Device, Tensor, D};
use plantdoc_core::{Error, ProbabilityVector, Result};
use std::time::Instant;

use crate::preprocess::InputTensor;

/// Trait for all image classifiers
///
/// Implementations are synchronous; callers move the work onto a blocking
/// thread. Weights are read-only after construction so `&self` is enough.
pub trait Classifier: Send + Sync {
    /// Get the classifier name
    fn name(&self) -> &str;

    /// Size of the logit vector
    fn num_classes(&self) -> usize;

    /// Device holding the weights
    fn device(&self) -> &Device;

    /// Feature extractor: (B, 3, 224, 224) -> (B, C, H, W)
    fn features(&self, input: &Tensor) -> Result<Tensor>;

    /// Classification head: (B, C, H, W) -> (B, N) logits
    fn head(&self, features: &Tensor) -> Result<Tensor>;

    /// Full forward pass producing logits
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let features = self.features(input)?;
        self.head(&features)
    }
}

impl std::fmt::Debug for dyn Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("name", &self.name())
            .field("num_classes", &self.num_classes())
            .finish()
    }
}

/// Output of a single classification
#[derive(Debug, Clone)]
pub struct Classification {
    /// Softmax over the logits
    pub probabilities: ProbabilityVector,

    /// Latency in microseconds
    pub latency_us: u64,
}

/// Convert a (1, N) or (N,) logit tensor to probabilities
pub fn softmax(logits: &Tensor) -> Result<ProbabilityVector> {
    let logits = match logits.rank() {
        1 => logits.clone(),
        2 => logits
            .squeeze(0)
            .map_err(|e| Error::computation(format!("Failed to squeeze logits: {}", e)))?,
        rank => {
            return Err(Error::computation(format!(
                "Expected logits of rank 1 or 2, got rank {}",
                rank
            )))
        }
    };

    let probs = candle_nn::ops::softmax(&logits, D::Minus1)
        .map_err(|e| Error::computation(format!("Softmax failed: {}", e)))?;

    let values: Vec<f32> = probs
        .to_dtype(candle_core::DType::F32)
        .and_then(|p| p.to_vec1())
        .map_err(|e| Error::computation(format!("Failed to read probabilities: {}", e)))?;

    ProbabilityVector::new(values)
}

/// Run a full forward pass on a preprocessed image
pub fn classify(classifier: &dyn Classifier, input: &InputTensor) -> Result<Classification> {
    let start = Instant::now();

    let tensor = input.to_tensor(classifier.device())?;
    let logits = classifier.forward(&tensor)?;
    let probabilities = softmax(&logits)?;

    if probabilities.len() != classifier.num_classes() {
        return Err(Error::computation(format!(
            "{} produced {} scores, expected {}",
            classifier.name(),
            probabilities.len(),
            classifier.num_classes()
        )));
    }

    Ok(Classification {
        probabilities,
        latency_us: start.elapsed().as_micros() as u64,
    })
}
