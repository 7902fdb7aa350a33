//! Configuration for the diagnosis pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::decision::DecisionConfig;
use crate::model_loader::ModelConfig;
use crate::quality::DEFAULT_BLUR_THRESHOLD;
use crate::saliency::SaliencyConfig;

/// Everything needed to build a [`crate::DiagnosisService`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Weights, labels and device
    #[serde(default)]
    pub model: ModelConfig,

    /// Blur gate
    #[serde(default)]
    pub quality: QualityConfig,

    /// Confidence gating
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Grad-CAM overlay rendering
    #[serde(default)]
    pub saliency: SaliencyConfig,

    /// Optional YAML advice overlay merged over the built-in catalog
    #[serde(default)]
    pub advisory_path: Option<PathBuf>,
}

/// Quality gate configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Laplacian variance below which images are rejected
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            blur_threshold: default_blur_threshold(),
        }
    }
}

fn default_blur_threshold() -> f64 {
    DEFAULT_BLUR_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_loader::DeviceType;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config: VisionConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, VisionConfig::default());
        assert_eq!(config.quality.blur_threshold, 100.0);
        assert_eq!(config.decision.confidence_threshold, 0.5);
        assert_eq!(config.decision.top_k, 3);
        assert_eq!(config.saliency.image_weight, 0.5);
        assert_eq!(config.model.weights_path, PathBuf::from("plantdoc_mobilenetv2.pth"));
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
model:
  labels_path: /srv/plantdoc/classes.txt
  device: cuda
quality:
  blur_threshold: 60.0
decision:
  confidence_threshold: 0.7
advisory_path: advice.yaml
"#;
        let config: VisionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.model.device, DeviceType::Cuda);
        assert_eq!(config.model.labels_path, PathBuf::from("/srv/plantdoc/classes.txt"));
        assert_eq!(config.quality.blur_threshold, 60.0);
        assert_eq!(config.decision.confidence_threshold, 0.7);
        assert_eq!(config.decision.top_k, 3);
        assert_eq!(config.advisory_path, Some(PathBuf::from("advice.yaml")));
        assert_eq!(config.saliency.jpeg_quality, 90);
    }
}
