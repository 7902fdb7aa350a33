//! Gradient-weighted class activation mapping (Grad-CAM)
//!
//! The classifier's feature map is cut loose as a fresh variable, the head is
//! run on top of it and the target logit is back-propagated. Channel weights
//! are the spatial mean of the gradient; the map is the rectified weighted sum
//! of the feature channels.

use base64::Engine;
use candle_core::{DType, IndexOp, Tensor, Var};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use plantdoc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::classifier::Classifier;
use crate::preprocess::{InputTensor, INPUT_SIZE};

/// Added to the range before dividing so flat maps do not blow up
const NORMALIZE_EPS: f32 = 1e-7;

/// Overlay rendering settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SaliencyConfig {
    /// Weight of the original image in the blend (heatmap gets `1 - w`)
    #[serde(default = "default_image_weight")]
    pub image_weight: f32,

    /// JPEG quality for the encoded overlay
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for SaliencyConfig {
    fn default() -> Self {
        Self {
            image_weight: default_image_weight(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_image_weight() -> f32 {
    0.5
}

fn default_jpeg_quality() -> u8 {
    90
}

/// Single channel map in [0, 1] at model input resolution
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
    target: usize,
}

impl SaliencyMap {
    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Class index the map explains
    pub fn target(&self) -> usize {
        self.target
    }

    /// Value at (x, y)
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    /// Row-major values
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Color-mapped saliency blended over the input image
#[derive(Debug, Clone)]
pub struct HeatmapOverlay {
    image: RgbImage,
    target: usize,
}

impl HeatmapOverlay {
    /// Rendered pixels
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Class index the overlay explains
    pub fn target(&self) -> usize {
        self.target
    }

    /// Encode as baseline JPEG
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
            .encode_image(&self.image)
            .map_err(|e| Error::computation(format!("Failed to encode heatmap: {}", e)))?;
        Ok(bytes)
    }

    /// `data:image/jpeg;base64,...` URL suitable for an `<img src>`
    pub fn to_data_url(&self, quality: u8) -> Result<String> {
        let jpeg = self.to_jpeg(quality)?;
        Ok(format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(jpeg)
        ))
    }
}

/// Produces Grad-CAM overlays for a shared classifier
#[derive(Clone)]
pub struct SaliencyExplainer {
    classifier: Arc<dyn Classifier>,
    config: SaliencyConfig,
}

impl std::fmt::Debug for SaliencyExplainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaliencyExplainer")
            .field("classifier", &self.classifier.name())
            .field("config", &self.config)
            .finish()
    }
}

impl SaliencyExplainer {
    /// Bind an explainer to the classifier's last feature layer
    pub fn new(classifier: Arc<dyn Classifier>, config: SaliencyConfig) -> Self {
        Self { classifier, config }
    }

    /// Rendering settings
    pub fn config(&self) -> &SaliencyConfig {
        &self.config
    }

    /// Overlay for the top-predicted class
    pub fn explain(&self, input: &InputTensor, image: &RgbImage) -> Result<HeatmapOverlay> {
        self.explain_target(input, image, None)
    }

    /// Overlay for `target`, or the top-predicted class when `None`
    pub fn explain_target(
        &self,
        input: &InputTensor,
        image: &RgbImage,
        target: Option<usize>,
    ) -> Result<HeatmapOverlay> {
        let map = self.saliency(input, target)?;
        Ok(render_overlay(image, &map, self.config.image_weight))
    }

    /// Grad-CAM map at input resolution, normalized to [0, 1]
    pub fn saliency(&self, input: &InputTensor, target: Option<usize>) -> Result<SaliencyMap> {
        let x = input.to_tensor(self.classifier.device())?;

        let features = self.classifier.features(&x)?;
        if features.rank() != 4 {
            return Err(Error::computation(format!(
                "{} feature layer has rank {}, expected (B, C, H, W)",
                self.classifier.name(),
                features.rank()
            )));
        }
        let features = Var::from_tensor(&features)
            .map_err(|e| Error::computation(format!("Failed to detach feature map: {}", e)))?;
        let logits = self.classifier.head(features.as_tensor())?;

        let num_classes = logits.dim(1).map_err(cam_err)?;
        let target = match target {
            Some(t) if t < num_classes => t,
            Some(t) => {
                return Err(Error::invalid_input(format!(
                    "target class {} out of range for {} classes",
                    t, num_classes
                )))
            }
            None => logits
                .i(0)
                .and_then(|l| l.argmax(0))
                .and_then(|i| i.to_scalar::<u32>())
                .map_err(cam_err)? as usize,
        };

        let grads = logits.i((0, target)).and_then(|s| s.backward()).map_err(cam_err)?;
        let grad = grads
            .get(features.as_tensor())
            .ok_or_else(|| Error::computation("no gradient reached the feature layer"))?;

        let weights = grad.mean_keepdim((2, 3)).map_err(cam_err)?;
        let cam = features
            .as_tensor()
            .broadcast_mul(&weights)
            .and_then(|t| t.sum_keepdim(1))
            .and_then(|t| t.relu())
            .map_err(cam_err)?;

        let (_, _, h, w) = cam.dims4().map_err(cam_err)?;
        let values: Vec<f32> = cam
            .flatten_all()
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1())
            .map_err(cam_err)?;

        debug!(target_class = target, h, w, "Computed Grad-CAM");
        upscale(values, w as u32, h as u32, target)
    }
}

fn cam_err(e: candle_core::Error) -> Error {
    Error::computation(format!("Grad-CAM failed: {}", e))
}

/// Min-max scale into [0, 1]
fn normalize(values: &mut [f32]) {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !min.is_finite() || !max.is_finite() {
        values.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    let range = max - min + NORMALIZE_EPS;
    values.iter_mut().for_each(|v| *v = (*v - min) / range);
}

/// Bilinear resize of the coarse map to the model input size
///
/// The float resampler clamps to [0, 1], so the coarse map is scaled into
/// that range first and rescaled after.
fn upscale(mut values: Vec<f32>, width: u32, height: u32, target: usize) -> Result<SaliencyMap> {
    normalize(&mut values);
    let coarse: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(width, height, values)
        .ok_or_else(|| Error::computation("saliency map size does not match its data"))?;

    let resized = imageops::resize(&coarse, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let mut data = resized.into_raw();
    normalize(&mut data);

    Ok(SaliencyMap {
        width: INPUT_SIZE,
        height: INPUT_SIZE,
        data,
        target,
    })
}

/// Jet color map: dark blue at 0, green at 0.5, dark red at 1
pub fn jet(value: f32) -> [f32; 3] {
    let v = value.clamp(0.0, 1.0);
    let channel = |center: f32| (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Blend `(1 - w) * jet(map) + w * image`, rescaled so the brightest channel is 1
pub fn render_overlay(image: &RgbImage, map: &SaliencyMap, image_weight: f32) -> HeatmapOverlay {
    let w = image_weight.clamp(0.0, 1.0);
    let base = imageops::resize(image, map.width(), map.height(), FilterType::CatmullRom);

    let mut blended = Vec::with_capacity((map.width() * map.height() * 3) as usize);
    for (x, y, pixel) in base.enumerate_pixels() {
        let heat = jet(map.get(x, y));
        for c in 0..3 {
            let img = f32::from(pixel[c]) / 255.0;
            blended.push((1.0 - w) * heat[c] + w * img);
        }
    }

    let max = blended.iter().copied().fold(0.0f32, f32::max);
    let scale = if max > 0.0 { 1.0 / max } else { 0.0 };

    let image = RgbImage::from_fn(map.width(), map.height(), |x, y| {
        let i = ((y * map.width() + x) * 3) as usize;
        let px = |c: usize| (255.0 * blended[i + c] * scale) as u8;
        Rgb([px(0), px(1), px(2)])
    });

    HeatmapOverlay {
        image,
        target: map.target(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::Preprocessor;
    use candle_core::{Device, Module};
    use candle_nn::Linear;

    /// Pools the input into a 7x7 grid and scores the channel means linearly
    struct ChannelProbe {
        head: Linear,
        device: Device,
    }

    impl ChannelProbe {
        fn new(weights: &[f32], bias: &[f32]) -> Self {
            let n = bias.len();
            let device = Device::Cpu;
            let w = Tensor::from_slice(weights, (n, 3), &device).unwrap();
            let b = Tensor::from_slice(bias, n, &device).unwrap();
            Self {
                head: Linear::new(w, Some(b)),
                device,
            }
        }
    }

    impl Classifier for ChannelProbe {
        fn name(&self) -> &str {
            "channel_probe"
        }

        fn num_classes(&self) -> usize {
            self.head.weight().dims()[0]
        }

        fn device(&self) -> &Device {
            &self.device
        }

        fn features(&self, input: &Tensor) -> Result<Tensor> {
            input.avg_pool2d(32).map_err(cam_err)
        }

        fn head(&self, features: &Tensor) -> Result<Tensor> {
            let pooled = features.mean((2, 3)).map_err(cam_err)?;
            self.head.forward(&pooled).map_err(cam_err)
        }
    }

    fn red_left_green_right() -> RgbImage {
        RgbImage::from_fn(224, 224, |x, _| {
            if x < 112 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 255, 0])
            }
        })
    }

    fn explainer(weights: &[f32], bias: &[f32]) -> SaliencyExplainer {
        SaliencyExplainer::new(Arc::new(ChannelProbe::new(weights, bias)), SaliencyConfig::default())
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), [0.0, 0.0, 0.5]);
        assert_eq!(jet(0.5), [0.5, 1.0, 0.5]);
        assert_eq!(jet(1.0), [0.5, 0.0, 0.0]);
        assert_eq!(jet(-3.0), jet(0.0));
    }

    #[test]
    fn test_saliency_highlights_target_channel() {
        let image = red_left_green_right();
        let input = Preprocessor::new().transform(&image).unwrap();

        // Class 0 scores the red channel, class 1 the green channel.
        let explainer = explainer(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0], &[0.0, 0.0]);

        let red = explainer.saliency(&input, Some(0)).unwrap();
        assert_eq!((red.width(), red.height()), (224, 224));
        assert!(red.get(10, 100) > 0.9, "left was {}", red.get(10, 100));
        assert!(red.get(210, 100) < 0.1, "right was {}", red.get(210, 100));

        let green = explainer.saliency(&input, Some(1)).unwrap();
        assert!(green.get(210, 100) > 0.9);
        assert!(green.get(10, 100) < 0.1);
    }

    #[test]
    fn test_default_target_is_argmax() {
        let input = Preprocessor::new().transform(&red_left_green_right()).unwrap();
        let explainer = explainer(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0], &[0.0, 10.0]);
        assert_eq!(explainer.saliency(&input, None).unwrap().target(), 1);
    }

    #[test]
    fn test_target_out_of_range() {
        let input = Preprocessor::new().transform(&red_left_green_right()).unwrap();
        let err = explainer(&[1.0, 0.0, 0.0], &[0.0]).saliency(&input, Some(3)).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_map_values_in_unit_range() {
        let input = Preprocessor::new().transform(&red_left_green_right()).unwrap();
        let map = explainer(&[0.3, -0.2, 0.5], &[0.0]).saliency(&input, None).unwrap();
        assert!(map.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_overlay_encodes_to_data_url() {
        let image = red_left_green_right();
        let input = Preprocessor::new().transform(&image).unwrap();
        let overlay = explainer(&[1.0, 0.0, 0.0], &[0.0]).explain(&input, &image).unwrap();

        assert_eq!(overlay.image().dimensions(), (224, 224));
        let url = overlay.to_data_url(90).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));

        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(url.trim_start_matches("data:image/jpeg;base64,"))
            .unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (224, 224));
    }

    #[test]
    fn test_mobilenet_feature_layer() {
        use crate::mobilenet::{MobileNetV2, MobileNetV2Config};
        use candle_nn::{VarBuilder, VarMap};

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = MobileNetV2::new(MobileNetV2Config::new(4).with_width_mult(0.25), vb).unwrap();
        let explainer = SaliencyExplainer::new(Arc::new(model), SaliencyConfig::default());

        let image = red_left_green_right();
        let input = Preprocessor::new().transform(&image).unwrap();

        for target in [None, Some(2)] {
            let map = explainer.saliency(&input, target).unwrap();
            assert_eq!((map.width(), map.height()), (224, 224));
            assert!(map.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(map.target() < 4);
            if let Some(t) = target {
                assert_eq!(map.target(), t);
            }

            let overlay = explainer.explain_target(&input, &image, target).unwrap();
            assert_eq!(overlay.target(), map.target());
            let url = overlay.to_data_url(90).unwrap();
            let jpeg = base64::engine::general_purpose::STANDARD
                .decode(url.trim_start_matches("data:image/jpeg;base64,"))
                .unwrap();
            let decoded = image::load_from_memory(&jpeg).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (224, 224));
        }
    }

    #[test]
    fn test_render_overlay_flat_map() {
        let image = RgbImage::from_pixel(50, 40, Rgb([0, 0, 0]));
        let map = SaliencyMap {
            width: 224,
            height: 224,
            data: vec![0.0; 224 * 224],
            target: 0,
        };
        // Black image under a zero map leaves only jet(0) = dark blue, rescaled to full blue.
        let overlay = render_overlay(&image, &map, 0.5);
        assert_eq!(overlay.image().get_pixel(5, 5), &Rgb([0, 0, 255]));
    }
}
