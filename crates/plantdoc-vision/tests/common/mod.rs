//! Deterministic test classifier and synthetic images
//!
//! `ProbeClassifier` average-pools the input into a 7x7 grid (standing in for
//! a convolutional feature map) and scores each class as a linear function of
//! the per-channel means, so tests can steer predictions with image colors.

#![allow(dead_code)]

use candle_core::{Device, Module, Tensor};
use candle_nn::Linear;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use plantdoc_core::{Error, LabelSet, LabelSource, Result};
use plantdoc_vision::{Classifier, DeviceType, LoadedModel, ModelStatus};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const RED: usize = 0;
pub const GREEN: usize = 1;
pub const BLUE: usize = 2;

/// Linear probe over channel means
pub struct ProbeClassifier {
    num_classes: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
    fail: bool,
    device: Device,
    calls: AtomicU32,
}

impl ProbeClassifier {
    /// All-zero probe: uniform probabilities for any input
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            weights: vec![0.0; num_classes * 3],
            bias: vec![0.0; num_classes],
            fail: false,
            device: Device::Cpu,
            calls: AtomicU32::new(0),
        }
    }

    /// Make `class` respond to `channel` with the given weight
    pub fn with_channel_weight(mut self, class: usize, channel: usize, weight: f32) -> Self {
        self.weights[class * 3 + channel] = weight;
        self
    }

    /// Set the bias of `class`
    pub fn with_bias(mut self, class: usize, bias: f32) -> Self {
        self.bias[class] = bias;
        self
    }

    /// Make every forward pass fail
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Number of feature passes run so far
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn linear(&self) -> Result<Linear> {
        let w = Tensor::from_slice(&self.weights, (self.num_classes, 3), &self.device)
            .map_err(|e| Error::computation(e.to_string()))?;
        let b = Tensor::from_slice(&self.bias, self.num_classes, &self.device)
            .map_err(|e| Error::computation(e.to_string()))?;
        Ok(Linear::new(w, Some(b)))
    }
}

impl Classifier for ProbeClassifier {
    fn name(&self) -> &str {
        "probe"
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn features(&self, input: &Tensor) -> Result<Tensor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::computation("probe configured to fail"));
        }
        input.avg_pool2d(32).map_err(|e| Error::computation(e.to_string()))
    }

    fn head(&self, features: &Tensor) -> Result<Tensor> {
        let pooled = features.mean((2, 3)).map_err(|e| Error::computation(e.to_string()))?;
        self.linear()?
            .forward(&pooled)
            .map_err(|e| Error::computation(e.to_string()))
    }
}

/// Probe over the default labels that diagnoses green leaves as
/// `Tomato_healthy` and red leaves as `Tomato_Late_blight`
pub fn leaf_probe() -> ProbeClassifier {
    ProbeClassifier::new(6)
        .with_channel_weight(0, GREEN, 10.0)
        .with_channel_weight(1, RED, 10.0)
}

pub fn loaded_model(probe: Arc<ProbeClassifier>, labels: LabelSet) -> Result<LoadedModel> {
    let status = ModelStatus {
        architecture: "probe".to_string(),
        weights_loaded: true,
        weights_path: None,
        labels_source: LabelSource::Default,
        num_classes: probe.num_classes(),
        device: DeviceType::Cpu,
    };
    LoadedModel::from_parts(probe, labels, status)
}

/// Leaf colored image with dark vertical veins every 8 pixels
pub fn striped_leaf(color: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(256, 256, |x, _| {
        if x % 8 < 2 {
            Rgb([0, 0, 0])
        } else {
            Rgb(color)
        }
    })
}

pub fn green_leaf() -> RgbImage {
    striped_leaf([30, 200, 40])
}

pub fn red_leaf() -> RgbImage {
    striped_leaf([200, 30, 40])
}

pub fn gray() -> RgbImage {
    RgbImage::from_pixel(256, 256, Rgb([128, 128, 128]))
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut bytes, format)
        .unwrap();
    bytes.into_inner()
}

pub fn png(image: &RgbImage) -> Vec<u8> {
    encode(image, ImageFormat::Png)
}
