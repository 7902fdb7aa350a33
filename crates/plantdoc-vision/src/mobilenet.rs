//! MobileNetV2 in candle
//!
//! Parameter names follow the torchvision layout so checkpoints produced by
//! `torchvision.models.mobilenet_v2` (with `classifier[1]` replaced by a
//! `Linear(last_channel, N)`) load without renaming:
//!
//! - `features.0.{0,1}` stem conv + batch norm
//! - `features.1..=17.conv.*` inverted residual blocks
//! - `features.18.{0,1}` final 1x1 conv + batch norm
//! - `classifier.1.{weight,bias}` linear head
//!
//! Dropout in `classifier.0` is an identity at inference and has no weights.

use candle_core::{Device, Module, ModuleT, Tensor};
use candle_nn::{Activation, BatchNorm, Conv2d, Conv2dConfig, Linear, VarBuilder};
use plantdoc_core::{Error, Result};

use crate::classifier::Classifier;

const BN_EPS: f64 = 1e-5;

/// (expand ratio, output channels, repeats, first stride)
const INVERTED_RESIDUAL_SETTING: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

/// Architecture hyperparameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MobileNetV2Config {
    /// Number of output classes
    pub num_classes: usize,

    /// Channel width multiplier (1.0 for the standard network)
    pub width_mult: f64,
}

impl MobileNetV2Config {
    /// Standard width network with `num_classes` outputs
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            width_mult: 1.0,
        }
    }

    /// Set the width multiplier
    pub fn with_width_mult(mut self, width_mult: f64) -> Self {
        self.width_mult = width_mult;
        self
    }

    /// Channels produced by the feature extractor
    pub fn last_channel(&self) -> usize {
        make_divisible(1280.0 * self.width_mult.max(1.0), 8)
    }
}

/// Round a channel count to a multiple of `divisor`, never dropping more than 10%
pub fn make_divisible(value: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let rounded = (((value + d / 2.0) as usize) / divisor) * divisor;
    let mut new_value = rounded.max(divisor);
    if (new_value as f64) < 0.9 * value {
        new_value += divisor;
    }
    new_value
}

fn load_err(what: &str) -> impl Fn(candle_core::Error) -> Error + '_ {
    move |e| Error::model(format!("Failed to load {}: {}", what, e))
}

fn forward_err(what: &str) -> impl Fn(candle_core::Error) -> Error + '_ {
    move |e| Error::computation(format!("{} failed: {}", what, e))
}

/// Conv2d without bias, batch norm, optional ReLU6
#[derive(Debug, Clone)]
struct ConvBn {
    conv: Conv2d,
    bn: BatchNorm,
    relu6: bool,
}

impl ConvBn {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        relu6: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let config = Conv2dConfig {
            padding: (kernel - 1) / 2,
            stride,
            groups,
            ..Default::default()
        };
        let conv = candle_nn::conv2d_no_bias(in_channels, out_channels, kernel, config, vb.pp("0"))
            .map_err(load_err("conv"))?;
        let bn = candle_nn::batch_norm(out_channels, BN_EPS, vb.pp("1")).map_err(load_err("batch norm"))?;
        Ok(Self { conv, bn, relu6 })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv.forward(xs).map_err(forward_err("conv"))?;
        let xs = self.bn.forward_t(&xs, false).map_err(forward_err("batch norm"))?;
        if self.relu6 {
            Activation::Relu6.forward(&xs).map_err(forward_err("relu6"))
        } else {
            Ok(xs)
        }
    }
}

/// Expand (optional), depthwise 3x3, linear projection
#[derive(Debug, Clone)]
struct InvertedResidual {
    expand: Option<ConvBn>,
    depthwise: ConvBn,
    project: Conv2d,
    project_bn: BatchNorm,
    use_residual: bool,
}

impl InvertedResidual {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expand_ratio: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden = in_channels * expand_ratio;
        let vb = vb.pp("conv");

        // Torchvision numbers the sequential children, so indices shift when
        // the expansion layer is absent.
        let mut index = 0;
        let expand = if expand_ratio != 1 {
            let layer = ConvBn::new(in_channels, hidden, 1, 1, 1, true, vb.pp(index))?;
            index += 1;
            Some(layer)
        } else {
            None
        };

        let depthwise = ConvBn::new(hidden, hidden, 3, stride, hidden, true, vb.pp(index))?;
        index += 1;

        let project = candle_nn::conv2d_no_bias(hidden, out_channels, 1, Conv2dConfig::default(), vb.pp(index))
            .map_err(load_err("projection conv"))?;
        index += 1;

        let project_bn =
            candle_nn::batch_norm(out_channels, BN_EPS, vb.pp(index)).map_err(load_err("projection batch norm"))?;

        Ok(Self {
            expand,
            depthwise,
            project,
            project_bn,
            use_residual: stride == 1 && in_channels == out_channels,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut ys = match &self.expand {
            Some(expand) => expand.forward(xs)?,
            None => xs.clone(),
        };
        ys = self.depthwise.forward(&ys)?;
        ys = self.project.forward(&ys).map_err(forward_err("projection conv"))?;
        ys = self
            .project_bn
            .forward_t(&ys, false)
            .map_err(forward_err("projection batch norm"))?;

        if self.use_residual {
            (xs + ys).map_err(forward_err("residual add"))
        } else {
            Ok(ys)
        }
    }
}

#[derive(Debug, Clone)]
enum FeatureLayer {
    ConvBn(ConvBn),
    Block(InvertedResidual),
}

impl FeatureLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::ConvBn(layer) => layer.forward(xs),
            Self::Block(block) => block.forward(xs),
        }
    }
}

/// MobileNetV2 image classifier in inference mode
#[derive(Debug, Clone)]
pub struct MobileNetV2 {
    name: String,
    config: MobileNetV2Config,
    features: Vec<FeatureLayer>,
    classifier: Linear,
    device: Device,
}

impl MobileNetV2 {
    /// Build the network, pulling every parameter from `vb`
    pub fn new(config: MobileNetV2Config, vb: VarBuilder) -> Result<Self> {
        if config.num_classes == 0 {
            return Err(Error::model("MobileNetV2 needs at least one output class"));
        }
        if config.width_mult.is_nan() || config.width_mult <= 0.0 {
            return Err(Error::model(format!(
                "width multiplier must be positive, got {}",
                config.width_mult
            )));
        }

        let device = vb.device().clone();
        let features_vb = vb.pp("features");
        let mut features = Vec::with_capacity(19);

        let mut input_channel = make_divisible(32.0 * config.width_mult, 8);
        features.push(FeatureLayer::ConvBn(ConvBn::new(
            3,
            input_channel,
            3,
            2,
            1,
            true,
            features_vb.pp(0),
        )?));

        for (t, c, n, s) in INVERTED_RESIDUAL_SETTING {
            let output_channel = make_divisible(c as f64 * config.width_mult, 8);
            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                let block = InvertedResidual::new(
                    input_channel,
                    output_channel,
                    stride,
                    t,
                    features_vb.pp(features.len()),
                )?;
                features.push(FeatureLayer::Block(block));
                input_channel = output_channel;
            }
        }

        let last_channel = config.last_channel();
        features.push(FeatureLayer::ConvBn(ConvBn::new(
            input_channel,
            last_channel,
            1,
            1,
            1,
            true,
            features_vb.pp(features.len()),
        )?));

        let classifier = candle_nn::linear(last_channel, config.num_classes, vb.pp("classifier").pp(1))
            .map_err(load_err("classifier head"))?;

        Ok(Self {
            name: "mobilenet_v2".to_string(),
            config,
            features,
            classifier,
            device,
        })
    }

    /// Architecture hyperparameters
    pub fn config(&self) -> &MobileNetV2Config {
        &self.config
    }
}

impl Classifier for MobileNetV2 {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn features(&self, input: &Tensor) -> Result<Tensor> {
        let mut xs = input.clone();
        for layer in &self.features {
            xs = layer.forward(&xs)?;
        }
        Ok(xs)
    }

    fn head(&self, features: &Tensor) -> Result<Tensor> {
        let pooled = features.mean((2, 3)).map_err(forward_err("global average pool"))?;
        self.classifier.forward(&pooled).map_err(forward_err("classifier head"))
    }
}
