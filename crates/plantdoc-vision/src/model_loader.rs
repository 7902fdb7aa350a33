//! Model lifecycle: labels, weights and device, loaded once at startup

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use plantdoc_core::{Error, LabelSet, LabelSource, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::classifier::Classifier;
use crate::mobilenet::{MobileNetV2, MobileNetV2Config};

/// Device type for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// CPU inference (always available)
    #[default]
    Cpu,
    /// CUDA GPU inference (if compiled in)
    Cuda,
    /// Metal (Apple Silicon)
    Metal,
}

/// Weight file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// SafeTensors format (memory mapped)
    SafeTensors,
    /// PyTorch pickle checkpoint (`torch.save(model.state_dict())`)
    PyTorch,
}

impl ModelFormat {
    /// Infer the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("safetensors") => Ok(Self::SafeTensors),
            Some("pth") | Some("pt") | Some("bin") => Ok(Self::PyTorch),
            other => Err(Error::config(format!(
                "Unsupported weights extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Weights hosted on the Hugging Face Hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuggingFaceSource {
    /// Repository id, e.g. `org/plantdoc-mobilenetv2`
    pub repo_id: String,

    /// Revision (defaults to `main`)
    #[serde(default)]
    pub revision: Option<String>,

    /// File inside the repository
    pub filename: String,
}

/// Where to find the classifier and its labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Local weights file
    #[serde(default = "default_weights_path")]
    pub weights_path: PathBuf,

    /// Newline-delimited label list
    #[serde(default = "default_labels_path")]
    pub labels_path: PathBuf,

    /// Device to run inference on
    #[serde(default)]
    pub device: DeviceType,

    /// MobileNetV2 width multiplier
    #[serde(default = "default_width_mult")]
    pub width_mult: f64,

    /// Remote weights used when the local file is missing
    #[serde(default)]
    pub huggingface: Option<HuggingFaceSource>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights_path: default_weights_path(),
            labels_path: default_labels_path(),
            device: DeviceType::Cpu,
            width_mult: default_width_mult(),
            huggingface: None,
        }
    }
}

impl ModelConfig {
    /// Set the local weights path
    pub fn with_weights(mut self, path: impl Into<PathBuf>) -> Self {
        self.weights_path = path.into();
        self
    }

    /// Set the label file path
    pub fn with_labels(mut self, path: impl Into<PathBuf>) -> Self {
        self.labels_path = path.into();
        self
    }

    /// Set device
    pub fn with_device(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }

    /// Set the width multiplier
    pub fn with_width_mult(mut self, width_mult: f64) -> Self {
        self.width_mult = width_mult;
        self
    }

    /// Fetch weights from the Hugging Face Hub when no local file exists
    pub fn with_huggingface(mut self, repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        self.huggingface = Some(HuggingFaceSource {
            repo_id: repo_id.into(),
            revision: None,
            filename: filename.into(),
        });
        self
    }
}

fn default_weights_path() -> PathBuf {
    PathBuf::from("plantdoc_mobilenetv2.pth")
}

fn default_labels_path() -> PathBuf {
    PathBuf::from("classes.txt")
}

fn default_width_mult() -> f64 {
    1.0
}

/// What was actually loaded, reported by the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Classifier architecture
    pub architecture: String,

    /// False when running on random weights
    pub weights_loaded: bool,

    /// Weights file in use
    pub weights_path: Option<PathBuf>,

    /// Where the labels came from
    pub labels_source: LabelSource,

    /// Output dimension of the classifier
    pub num_classes: usize,

    /// Inference device
    pub device: DeviceType,
}

/// Classifier and label set, ready for read-only sharing
pub struct LoadedModel {
    classifier: Arc<dyn Classifier>,
    labels: LabelSet,
    status: ModelStatus,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("classifier", &self.classifier.name())
            .field("status", &self.status)
            .finish()
    }
}

impl LoadedModel {
    /// Load labels, build MobileNetV2 and bind weights
    ///
    /// A missing label file falls back to the built-in labels and a missing
    /// weights file falls back to random initialization. Both are logged as
    /// warnings; everything else is an error.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let (labels, labels_source) = LabelSet::load_or_default(&config.labels_path)?;
        let device = create_device(config.device)?;
        let arch = MobileNetV2Config::new(labels.len()).with_width_mult(config.width_mult);

        let weights_path = resolve_weights_path(config)?;

        let classifier = match &weights_path {
            Some(path) => {
                let vb = var_builder(path, &device)?;
                let model = MobileNetV2::new(arch, vb)?;
                info!(
                    "Loaded {} weights from {} on {:?}",
                    model.name(),
                    path.display(),
                    config.device
                );
                model
            }
            None => {
                warn!(
                    "Weights file {} not found. Running with RANDOM weights, predictions are meaningless",
                    config.weights_path.display()
                );
                let varmap = VarMap::new();
                let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
                MobileNetV2::new(arch, vb)?
            }
        };

        let status = ModelStatus {
            architecture: classifier.name().to_string(),
            weights_loaded: weights_path.is_some(),
            weights_path,
            labels_source,
            num_classes: labels.len(),
            device: config.device,
        };

        Self::from_parts(Arc::new(classifier), labels, status)
    }

    /// Assemble from an already built classifier
    pub fn from_parts(classifier: Arc<dyn Classifier>, labels: LabelSet, status: ModelStatus) -> Result<Self> {
        if classifier.num_classes() != labels.len() {
            return Err(Error::model(format!(
                "{} has {} outputs but {} labels are loaded",
                classifier.name(),
                classifier.num_classes(),
                labels.len()
            )));
        }
        Ok(Self {
            classifier,
            labels,
            status,
        })
    }

    /// Shared classifier handle
    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    /// Active label set
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Load report
    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    /// Split into parts
    pub fn into_parts(self) -> (Arc<dyn Classifier>, LabelSet, ModelStatus) {
        (self.classifier, self.labels, self.status)
    }
}

/// Create Candle device from device type
pub fn create_device(device_type: DeviceType) -> Result<Device> {
    match device_type {
        DeviceType::Cpu => Ok(Device::Cpu),
        DeviceType::Cuda => {
            Device::new_cuda(0).map_err(|e| Error::model(format!("Failed to create CUDA device: {}", e)))
        }
        DeviceType::Metal => {
            Device::new_metal(0).map_err(|e| Error::model(format!("Failed to create Metal device: {}", e)))
        }
    }
}

/// Local weights if present, otherwise the Hub download if configured
fn resolve_weights_path(config: &ModelConfig) -> Result<Option<PathBuf>> {
    if config.weights_path.exists() {
        return Ok(Some(config.weights_path.clone()));
    }

    match &config.huggingface {
        Some(source) => download_weights(source).map(Some),
        None => Ok(None),
    }
}

#[cfg(feature = "hf-download")]
fn download_weights(source: &HuggingFaceSource) -> Result<PathBuf> {
    use hf_hub::{api::sync::Api, Repo, RepoType};

    let api = Api::new().map_err(|e| Error::config(format!("Failed to initialize HF API: {}", e)))?;

    let repo = api.repo(Repo::with_revision(
        source.repo_id.clone(),
        RepoType::Model,
        source.revision.clone().unwrap_or_else(|| "main".to_string()),
    ));

    info!("Fetching {} from {}", source.filename, source.repo_id);
    repo.get(&source.filename)
        .map_err(|e| Error::model(format!("Failed to download weights from HF: {}", e)))
}

#[cfg(not(feature = "hf-download"))]
fn download_weights(source: &HuggingFaceSource) -> Result<PathBuf> {
    Err(Error::config(format!(
        "Weights for {} are configured on the Hub but hf-download support is not compiled in",
        source.repo_id
    )))
}

fn var_builder(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    match ModelFormat::from_path(path)? {
        ModelFormat::SafeTensors => {
            // SAFETY: the file is treated as immutable for the life of the process.
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)
                    .map_err(|e| Error::model(format!("Failed to load SafeTensors: {}", e)))
            }
        }
        ModelFormat::PyTorch => VarBuilder::from_pth(path, DType::F32, device)
            .map_err(|e| Error::model(format!("Failed to load PyTorch weights: {}", e))),
    }
}
