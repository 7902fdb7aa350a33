//! Router fixtures backed by a deterministic probe classifier

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use candle_core::{Device, Module, Tensor};
use candle_nn::Linear;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use plantdoc_core::{Error, LabelSet, LabelSource, Result};
use plantdoc_server::{create_router, AppConfig, AppState, ChatRelay};
use plantdoc_vision::{Classifier, DeviceType, DiagnosisService, LoadedModel, ModelStatus};
use std::io::Cursor;
use std::sync::Arc;

pub const BOUNDARY: &str = "plantdoc-test-boundary";

/// Scores class 0 by mean green and class 1 by mean red
pub struct LeafProbe {
    fail: bool,
    device: Device,
}

impl LeafProbe {
    pub fn new() -> Self {
        Self {
            fail: false,
            device: Device::Cpu,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            device: Device::Cpu,
        }
    }
}

impl Classifier for LeafProbe {
    fn name(&self) -> &str {
        "leaf-probe"
    }

    fn num_classes(&self) -> usize {
        6
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn features(&self, input: &Tensor) -> Result<Tensor> {
        if self.fail {
            return Err(Error::computation("probe configured to fail"));
        }
        input.avg_pool2d(32).map_err(|e| Error::computation(e.to_string()))
    }

    fn head(&self, features: &Tensor) -> Result<Tensor> {
        let mut weights = vec![0f32; 6 * 3];
        weights[1] = 10.0;
        weights[3] = 10.0;
        let w = Tensor::from_slice(&weights, (6, 3), &self.device)
            .map_err(|e| Error::computation(e.to_string()))?;
        let pooled = features.mean((2, 3)).map_err(|e| Error::computation(e.to_string()))?;
        Linear::new(w, None)
            .forward(&pooled)
            .map_err(|e| Error::computation(e.to_string()))
    }
}

pub fn router_with(probe: LeafProbe, chat: ChatRelay) -> Router {
    let config = AppConfig::default();
    let status = ModelStatus {
        architecture: "leaf-probe".to_string(),
        weights_loaded: true,
        weights_path: None,
        labels_source: LabelSource::Default,
        num_classes: 6,
        device: DeviceType::Cpu,
    };
    let model = LoadedModel::from_parts(Arc::new(probe), LabelSet::default_labels(), status).unwrap();
    let service = DiagnosisService::new(model, &config.vision).unwrap();
    create_router(AppState::new(config, service, chat, None))
}

pub fn router() -> Router {
    router_with(LeafProbe::new(), ChatRelay::demo())
}

/// `multipart/form-data` request carrying one `file` field
pub fn upload(uri: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"leaf\"\r\n");
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
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

pub fn png(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

pub fn green_leaf_png() -> Vec<u8> {
    png(&striped_leaf([30, 200, 40]))
}

pub fn gray_png() -> Vec<u8> {
    png(&RgbImage::from_pixel(256, 256, Rgb([128, 128, 128])))
}

/// Sharp 2x3000 striped strip with an extreme aspect ratio
pub fn thin_strip_png() -> Vec<u8> {
    png(&RgbImage::from_fn(2, 3000, |_, y| {
        if y % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    }))
}
