//! Remediation guidance per diagnosed class

use plantdoc_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Advice returned for labels without a dedicated entry
pub const GENERIC_ADVICE: [&str; 3] = [
    "Observe the plant regularly.",
    "Isolate the plant if in doubt.",
    "Consult an expert or a specialised forum if the symptoms get worse.",
];

const BUILTIN_ADVICE: &[(&str, &[&str])] = &[
    (
        "Tomato_healthy",
        &[
            "Keep watering regularly.",
            "Check the sun exposure.",
            "No specific action required.",
        ],
    ),
    (
        "Tomato_Late_blight",
        &[
            "Remove blackened leaves immediately and destroy them.",
            "Ventilate as much as possible to lower humidity.",
            "Treat with a mild fungicide (e.g. Bordeaux mixture).",
        ],
    ),
    (
        "Tomato_Leaf_Mold",
        &[
            "Lower the ambient humidity and ventilate generously.",
            "Prune affected lower leaves to improve air flow.",
            "Never water the foliage.",
        ],
    ),
    (
        "Tomato_Early_blight",
        &[
            "Remove infected leaves from the bottom of the plant.",
            "Improve air circulation between plants.",
            "Try crop rotation next year.",
        ],
    ),
    (
        "Potato_healthy",
        &[
            "Maintain good growing conditions.",
            "Watch for common pests such as Colorado potato beetles.",
        ],
    ),
    (
        "Potato_Late_blight",
        &[
            "Destroy infected parts (do not compost them).",
            "Treat quickly with a dedicated fungicide.",
            "If the infection is severe, harvest what can be saved.",
        ],
    ),
];

/// On-disk overlay format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AdvisoryFile {
    #[serde(default)]
    advice: HashMap<String, Vec<String>>,

    #[serde(default)]
    fallback: Option<Vec<String>>,
}

/// Static mapping from class label to ordered advice
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryCatalog {
    entries: HashMap<String, Vec<String>>,
    fallback: Vec<String>,
}

impl AdvisoryCatalog {
    /// Built-in catalog covering the default labels
    pub fn builtin() -> Self {
        let entries = BUILTIN_ADVICE
            .iter()
            .map(|(label, advice)| {
                (
                    label.to_string(),
                    advice.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect();
        Self {
            entries,
            fallback: GENERIC_ADVICE.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Advice for `label`, or the generic fallback. Never empty.
    pub fn lookup(&self, label: &str) -> &[String] {
        match self.entries.get(label) {
            Some(advice) if !advice.is_empty() => advice,
            _ => &self.fallback,
        }
    }

    /// Whether `label` has a dedicated entry
    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label)
    }

    /// Generic advice used for unknown labels
    pub fn fallback(&self) -> &[String] {
        &self.fallback
    }

    /// Number of dedicated entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when only the fallback is available
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse an overlay and merge it over the built-in catalog
    ///
    /// ```yaml
    /// advice:
    ///   Apple_scab:
    ///     - Rake and destroy fallen leaves.
    /// fallback:
    ///   - Ask a local extension service.
    /// ```
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: AdvisoryFile = serde_yaml::from_str(content)?;
        let mut catalog = Self::builtin();
        catalog.merge(file.advice, file.fallback);
        Ok(catalog)
    }

    /// Read an overlay file and merge it over the built-in catalog
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml_str(&content)?;
        info!(
            "Loaded advisory catalog from {} ({} labels)",
            path.display(),
            catalog.len()
        );
        Ok(catalog)
    }

    /// Replace entries and optionally the fallback. Empty lists are ignored
    /// so the never-empty lookup guarantee holds.
    pub fn merge(&mut self, entries: HashMap<String, Vec<String>>, fallback: Option<Vec<String>>) {
        for (label, advice) in entries {
            if !advice.is_empty() {
                self.entries.insert(label, advice);
            }
        }
        if let Some(fallback) = fallback.filter(|f| !f.is_empty()) {
            self.fallback = fallback;
        }
    }
}

impl Default for AdvisoryCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
