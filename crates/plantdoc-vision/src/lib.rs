//! PlantDoc Vision
//!
//! Image pipeline for leaf disease diagnosis:
//! - Quality gate: Laplacian-variance blur rejection before any model work
//! - Preprocessing: resize 256 / center crop 224 / ImageNet normalization
//! - Classification: MobileNetV2 on candle, loaded once at startup
//! - Decision: confidence-gated outcome with remediation advice
//! - Saliency: Grad-CAM heatmap overlays on the last feature layer
//!
//! Everything is synchronous; callers are expected to run inference on a
//! blocking thread.

pub mod advisory;
pub mod classifier;
pub mod config;
pub mod decision;
pub mod mobilenet;
pub mod model_loader;
pub mod preprocess;
pub mod quality;
pub mod saliency;
pub mod service;

pub use advisory::AdvisoryCatalog;
pub use classifier::{classify, softmax, Classification, Classifier};
pub use config::{QualityConfig, VisionConfig};
pub use decision::{DecisionConfig, DecisionPolicy, Outcome, BLURRY_MESSAGE, UNCERTAIN_MESSAGE};
pub use mobilenet::{MobileNetV2, MobileNetV2Config};
pub use model_loader::{DeviceType, HuggingFaceSource, LoadedModel, ModelConfig, ModelFormat, ModelStatus};
pub use preprocess::{InputTensor, Preprocessor};
pub use quality::{QualityGate, QualityReport};
pub use saliency::{HeatmapOverlay, SaliencyConfig, SaliencyExplainer, SaliencyMap};
pub use service::{DiagnosisReport, DiagnosisService, Explanation};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::Classifier;
    pub use crate::decision::Outcome;
    pub use crate::model_loader::{LoadedModel, ModelConfig};
    pub use crate::service::DiagnosisService;
    pub use crate::VisionConfig;
    pub use plantdoc_core::prelude::*;
}
