//! Core types for PlantDoc

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};

/// Labels used when no label file is present on disk
pub const DEFAULT_LABELS: [&str; 6] = [
    "Tomato_healthy",
    "Tomato_Late_blight",
    "Tomato_Early_blight",
    "Potato_healthy",
    "Potato_Late_blight",
    "Tomato_Leaf_Mold",
];

/// Where the active label set came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum LabelSource {
    /// Newline-delimited label file
    File(PathBuf),
    /// Built-in fallback list
    Default,
}

/// Ordered class names; the index is the class identity in the classifier output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// Create a label set from an ordered list of names
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(Error::config("label set must contain at least one label"));
        }
        Ok(Self { labels })
    }

    /// The built-in fallback labels
    pub fn default_labels() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Parse a newline-delimited label list. Surrounding whitespace is trimmed
    /// and blank lines are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        Self::new(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        )
    }

    /// Read a label file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load labels from `path` if it exists, otherwise fall back to the
    /// built-in list with a warning.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<(Self, LabelSource)> {
        let path = path.as_ref();
        if path.exists() {
            let labels = Self::from_file(path)?;
            Ok((labels, LabelSource::File(path.to_path_buf())))
        } else {
            warn!(
                "Label file {} not found, using {} built-in default labels",
                path.display(),
                DEFAULT_LABELS.len()
            );
            Ok((Self::default_labels(), LabelSource::Default))
        }
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false for a constructed label set
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at a class index
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Class index of a label
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Iterate labels in index order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Borrow the underlying labels
    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}

/// Softmax output, index-aligned with a [`LabelSet`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct ProbabilityVector {
    probs: Vec<f32>,
}

impl ProbabilityVector {
    /// Tolerance used when checking that probabilities sum to one
    pub const SUM_TOLERANCE: f32 = 1e-4;

    /// Wrap a probability distribution. Entries must be finite and in [0, 1].
    pub fn new(probs: Vec<f32>) -> Result<Self> {
        if probs.is_empty() {
            return Err(Error::computation("probability vector is empty"));
        }
        if let Some(bad) = probs
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0 + f32::EPSILON)
        {
            return Err(Error::computation(format!(
                "probability out of range: {}",
                bad
            )));
        }
        Ok(Self { probs })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.probs.len()
    }

    /// Always false for a constructed vector
    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    /// Probability of a class index
    pub fn get(&self, index: usize) -> Option<f32> {
        self.probs.get(index).copied()
    }

    /// Sum of all entries
    pub fn sum(&self) -> f32 {
        self.probs.iter().sum()
    }

    /// Whether the entries sum to one within [`Self::SUM_TOLERANCE`]
    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() <= Self::SUM_TOLERANCE
    }

    /// Index and value of the largest entry. Ties resolve to the lowest index.
    pub fn argmax(&self) -> (usize, f32) {
        let mut best = (0, self.probs[0]);
        for (idx, &p) in self.probs.iter().enumerate().skip(1) {
            if p > best.1 {
                best = (idx, p);
            }
        }
        best
    }

    /// The `k` most probable class indices, highest first
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> = self.probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed.truncate(k);
        indexed
    }

    /// Borrow the raw probabilities
    pub fn as_slice(&self) -> &[f32] {
        &self.probs
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = Error;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(labels: LabelSet) -> Self {
        labels.labels
    }
}

impl TryFrom<Vec<f32>> for ProbabilityVector {
    type Error = Error;

    fn try_from(probs: Vec<f32>) -> Result<Self> {
        Self::new(probs)
    }
}

impl From<ProbabilityVector> for Vec<f32> {
    fn from(probs: ProbabilityVector) -> Self {
        probs.probs
    }
}

/// Convert a probability in [0, 1] to a percentage rounded to two decimals
pub fn to_percent(prob: f32) -> f64 {
    (f64::from(prob) * 100.0 * 100.0).round() / 100.0
}

/// A single class guess as shown to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class label
    #[serde(rename = "class")]
    pub label: String,

    /// Confidence in percent, two decimals
    pub confidence: f64,
}

impl Prediction {
    /// Create a prediction from a label and a raw probability
    pub fn from_probability(label: impl Into<String>, prob: f32) -> Self {
        Self {
            label: label.into(),
            confidence: to_percent(prob),
        }
    }
}

/// Arg-max diagnosis of a probability vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Winning class label
    pub label: String,

    /// Confidence in percent within [0, 100]
    pub confidence_percent: f64,

    /// Raw winning probability, kept for threshold comparisons
    #[serde(skip)]
    pub probability: f32,
}

impl Diagnosis {
    /// Pick the arg-max of `probs` and resolve its label
    pub fn from_probabilities(probs: &ProbabilityVector, labels: &LabelSet) -> Result<Self> {
        if probs.len() != labels.len() {
            return Err(Error::computation(format!(
                "classifier produced {} scores for {} labels",
                probs.len(),
                labels.len()
            )));
        }
        let (index, probability) = probs.argmax();
        let label = labels
            .get(index)
            .ok_or_else(|| Error::internal(format!("no label at index {}", index)))?;
        Ok(Self {
            label: label.to_string(),
            confidence_percent: to_percent(probability),
            probability,
        })
    }

    /// The diagnosis as a caller-facing prediction
    pub fn as_prediction(&self) -> Prediction {
        Prediction {
            label: self.label.clone(),
            confidence: self.confidence_percent,
        }
    }
}
