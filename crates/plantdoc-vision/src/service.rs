//! Diagnosis service: the read-only pipeline shared by all requests

use image::DynamicImage;
use plantdoc_core::{Error, LabelSet, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::advisory::AdvisoryCatalog;
use crate::classifier::{classify, Classifier};
use crate::config::VisionConfig;
use crate::decision::{DecisionPolicy, Outcome};
use crate::model_loader::{LoadedModel, ModelStatus};
use crate::preprocess::Preprocessor;
use crate::quality::{QualityGate, QualityReport};
use crate::saliency::SaliencyExplainer;

/// Result of [`DiagnosisService::diagnose`]
#[derive(Debug, Clone)]
pub struct DiagnosisReport {
    /// Terminal outcome
    pub outcome: Outcome,

    /// Quality gate measurement
    pub quality: QualityReport,

    /// Classifier latency in microseconds (None when the gate rejected)
    pub inference_us: Option<u64>,
}

/// Result of [`DiagnosisService::explain`]
#[derive(Debug, Clone)]
pub struct Explanation {
    /// `data:image/jpeg;base64,...`
    pub data_url: String,

    /// Label of the explained class
    pub target: String,

    /// Forward + backward latency in microseconds
    pub latency_us: u64,
}

/// Quality gate, preprocessing, classification, decision and saliency
///
/// Built once at startup and shared behind an `Arc`; nothing in it is
/// mutated afterwards.
#[derive(Debug)]
pub struct DiagnosisService {
    gate: QualityGate,
    preprocessor: Preprocessor,
    classifier: Arc<dyn Classifier>,
    labels: LabelSet,
    policy: DecisionPolicy,
    explainer: SaliencyExplainer,
    status: ModelStatus,
}

impl DiagnosisService {
    /// Load the model and advice overlay described by `config`
    pub fn from_config(config: &VisionConfig) -> Result<Self> {
        let model = LoadedModel::load(&config.model)?;
        Self::new(model, config)
    }

    /// Build the pipeline around an already loaded model
    pub fn new(model: LoadedModel, config: &VisionConfig) -> Result<Self> {
        let catalog = match &config.advisory_path {
            Some(path) => AdvisoryCatalog::from_yaml_file(path)?,
            None => AdvisoryCatalog::builtin(),
        };

        let (classifier, labels, status) = model.into_parts();

        for label in labels.iter().filter(|l| !catalog.contains(l)) {
            warn!("No dedicated advice for label {}, generic advice will be used", label);
        }

        let explainer = SaliencyExplainer::new(classifier.clone(), config.saliency);

        info!(
            "Diagnosis service ready: {} classes, blur threshold {}, confidence threshold {}, weights loaded: {}",
            labels.len(),
            config.quality.blur_threshold,
            config.decision.confidence_threshold,
            status.weights_loaded
        );

        Ok(Self {
            gate: QualityGate::new(config.quality.blur_threshold),
            preprocessor: Preprocessor::new(),
            classifier,
            labels,
            policy: DecisionPolicy::new(config.decision, catalog),
            explainer,
            status,
        })
    }

    /// Active labels in class index order
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// What the lifecycle loaded
    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    /// Quality gate in use
    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Decision policy in use
    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    /// Decode uploaded bytes into an image
    pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| Error::image_decode(format!("Cannot read image: {}", e)))
    }

    /// Run the full pipeline on encoded image bytes
    ///
    /// Undecodable input is an error. A blurry image short-circuits to
    /// [`Outcome::Unusable`] without touching the classifier.
    pub fn diagnose(&self, bytes: &[u8]) -> Result<DiagnosisReport> {
        let image = Self::decode_image(bytes)?;

        let quality = self.gate.assess_image(&image);
        if !quality.sharp {
            debug!(variance = quality.variance, "Image rejected by quality gate");
            return Ok(DiagnosisReport {
                outcome: self.policy.unusable(quality.variance),
                quality,
                inference_us: None,
            });
        }

        let input = self.preprocessor.transform(&image.to_rgb8())?;
        let classification = classify(self.classifier.as_ref(), &input)?;
        let outcome = self.policy.decide(&classification.probabilities, &self.labels)?;

        Ok(DiagnosisReport {
            outcome,
            quality,
            inference_us: Some(classification.latency_us),
        })
    }

    /// Grad-CAM overlay for the top prediction, or for `target` when given
    pub fn explain(&self, bytes: &[u8], target: Option<&str>) -> Result<Explanation> {
        let start = Instant::now();

        let target_index = match target {
            Some(label) => Some(
                self.labels
                    .index_of(label)
                    .ok_or_else(|| Error::invalid_input(format!("Unknown class: {}", label)))?,
            ),
            None => None,
        };

        let image = Self::decode_image(bytes)?.to_rgb8();
        let input = self.preprocessor.transform(&image)?;
        let overlay = self.explainer.explain_target(&input, &image, target_index)?;
        let data_url = overlay.to_data_url(self.explainer.config().jpeg_quality)?;

        let target = self
            .labels
            .get(overlay.target())
            .ok_or_else(|| Error::internal(format!("no label at index {}", overlay.target())))?
            .to_string();

        Ok(Explanation {
            data_url,
            target,
            latency_us: start.elapsed().as_micros() as u64,
        })
    }
}
