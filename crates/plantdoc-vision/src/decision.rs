//! Confidence-gated interpretation of classifier output

use plantdoc_core::{Diagnosis, LabelSet, Prediction, ProbabilityVector, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::advisory::AdvisoryCatalog;

/// Default minimum winning probability for a confident diagnosis
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.50;

/// Default number of predictions in a success payload
pub const DEFAULT_TOP_K: usize = 3;

/// Message returned when the quality gate rejects an image
pub const BLURRY_MESSAGE: &str =
    "The image is too blurry. Please take a sharper photo for a reliable diagnosis.";

/// Message returned when the best guess is below the confidence threshold
pub const UNCERTAIN_MESSAGE: &str =
    "I don't know / confidence too low. The image may not be a clear leaf of a known plant.";

/// Terminal result of a diagnosis request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Quality gate rejected the image; no model work was done
    Unusable {
        /// Laplacian variance that failed the gate
        variance: f64,
    },

    /// Best guess is below the confidence threshold
    Uncertain {
        /// Best guess, reported for transparency
        best: Prediction,
    },

    /// Confident diagnosis with advice
    Success {
        /// Arg-max diagnosis
        diagnosis: Diagnosis,
        /// Most probable classes, best first
        top_predictions: Vec<Prediction>,
        /// Advice for the diagnosed label
        advice: Vec<String>,
    },
}

impl Outcome {
    /// Short outcome name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unusable { .. } => "unusable",
            Self::Uncertain { .. } => "uncertain",
            Self::Success { .. } => "success",
        }
    }

    /// Caller facing message for the non-success outcomes
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::Unusable { .. } => Some(BLURRY_MESSAGE),
            Self::Uncertain { .. } => Some(UNCERTAIN_MESSAGE),
            Self::Success { .. } => None,
        }
    }
}

/// Thresholds used by [`DecisionPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Winning probabilities below this are uncertain
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Predictions listed in a success payload
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

fn default_confidence_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// Turns a probability vector into an [`Outcome`]
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    config: DecisionConfig,
    catalog: AdvisoryCatalog,
}

impl DecisionPolicy {
    /// Create a policy
    pub fn new(config: DecisionConfig, catalog: AdvisoryCatalog) -> Self {
        Self { config, catalog }
    }

    /// Thresholds in use
    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Advice catalog in use
    pub fn catalog(&self) -> &AdvisoryCatalog {
        &self.catalog
    }

    /// Outcome for an image that failed the quality gate
    pub fn unusable(&self, variance: f64) -> Outcome {
        Outcome::Unusable { variance }
    }

    /// Decide between uncertain and success. A winning probability equal to
    /// the threshold is a success.
    pub fn decide(&self, probs: &ProbabilityVector, labels: &LabelSet) -> Result<Outcome> {
        let diagnosis = Diagnosis::from_probabilities(probs, labels)?;

        if diagnosis.probability < self.config.confidence_threshold {
            debug!(
                label = %diagnosis.label,
                probability = diagnosis.probability,
                "Prediction below confidence threshold"
            );
            return Ok(Outcome::Uncertain {
                best: diagnosis.as_prediction(),
            });
        }

        let top_predictions = probs
            .top_k(self.config.top_k.max(1))
            .into_iter()
            .filter_map(|(index, p)| labels.get(index).map(|label| Prediction::from_probability(label, p)))
            .collect();

        let advice = self.catalog.lookup(&diagnosis.label).to_vec();

        debug!(
            label = %diagnosis.label,
            confidence = diagnosis.confidence_percent,
            "Confident diagnosis"
        );

        Ok(Outcome::Success {
            diagnosis,
            top_predictions,
            advice,
        })
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::new(DecisionConfig::default(), AdvisoryCatalog::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelSet {
        LabelSet::new(["Tomato_healthy", "Tomato_Late_blight", "Potato_healthy", "Corn_rust"]).unwrap()
    }

    fn probs(values: &[f32]) -> ProbabilityVector {
        ProbabilityVector::new(values.to_vec()).unwrap()
    }

    #[test]
    fn test_exact_threshold_is_success() {
        let outcome = DecisionPolicy::default()
            .decide(&probs(&[0.1, 0.5, 0.25, 0.15]), &labels())
            .unwrap();

        match outcome {
            Outcome::Success {
                diagnosis,
                top_predictions,
                advice,
            } => {
                assert_eq!(diagnosis.label, "Tomato_Late_blight");
                assert_eq!(diagnosis.confidence_percent, 50.0);
                assert_eq!(top_predictions.len(), 3);
                assert_eq!(top_predictions[0].label, "Tomato_Late_blight");
                assert_eq!(top_predictions[1].label, "Potato_healthy");
                assert_eq!(advice.len(), 3);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_just_below_threshold_is_uncertain() {
        let outcome = DecisionPolicy::default()
            .decide(&probs(&[0.4999, 0.3, 0.2001, 0.0]), &labels())
            .unwrap();

        assert_eq!(outcome.kind(), "uncertain");
        assert_eq!(outcome.message(), Some(UNCERTAIN_MESSAGE));
        match outcome {
            Outcome::Uncertain { best } => {
                assert_eq!(best.label, "Tomato_healthy");
                assert_eq!(best.confidence, 49.99);
            }
            other => panic!("expected uncertain, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_label_uses_fallback_advice() {
        let outcome = DecisionPolicy::default()
            .decide(&probs(&[0.0, 0.0, 0.1, 0.9]), &labels())
            .unwrap();
        match outcome {
            Outcome::Success { advice, .. } => {
                assert_eq!(advice, crate::advisory::GENERIC_ADVICE.map(String::from).to_vec())
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_configurable_threshold_and_top_k() {
        let policy = DecisionPolicy::new(
            DecisionConfig {
                confidence_threshold: 0.8,
                top_k: 1,
            },
            AdvisoryCatalog::builtin(),
        );
        let labels = labels();

        assert_eq!(
            policy.decide(&probs(&[0.7, 0.1, 0.1, 0.1]), &labels).unwrap().kind(),
            "uncertain"
        );
        match policy.decide(&probs(&[0.85, 0.05, 0.05, 0.05]), &labels).unwrap() {
            Outcome::Success { top_predictions, .. } => assert_eq!(top_predictions.len(), 1),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_length_mismatch_is_error() {
        assert!(DecisionPolicy::default().decide(&probs(&[0.5, 0.5]), &labels()).is_err());
    }

    #[test]
    fn test_unusable_message() {
        let outcome = DecisionPolicy::default().unusable(12.5);
        assert_eq!(outcome.kind(), "unusable");
        assert_eq!(outcome.message(), Some(BLURRY_MESSAGE));
    }
}
