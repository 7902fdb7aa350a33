//! Deterministic resize / crop / normalize transform
//!
//! The classifier was trained against exactly this transform: the shorter
//! edge is resized to 256 pixels, a centered 224x224 window is cut out,
//! channels are scaled to [0, 1] and normalized with ImageNet statistics.
//! Any deviation silently degrades accuracy, so the steps and constants are
//! fixed here rather than configurable.

use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use plantdoc_core::{Error, Result};

/// Side length of the square model input
pub const INPUT_SIZE: u32 = 224;

/// Target length of the shorter edge before cropping
pub const RESIZE_SHORTER: u32 = 256;

/// Longest edge accepted after the shorter-edge resize. Thin strips would
/// otherwise allocate a huge intermediate for a 224x224 window.
pub const MAX_RESIZED_EDGE: u32 = 8192;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalized CHW float tensor of shape (3, 224, 224)
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
}

impl InputTensor {
    /// Shape as (channels, height, width)
    pub fn shape(&self) -> (usize, usize, usize) {
        (3, INPUT_SIZE as usize, INPUT_SIZE as usize)
    }

    /// Flat CHW data
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Value at channel `c`, row `y`, column `x`
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        let side = INPUT_SIZE as usize;
        self.data[c * side * side + y * side + x]
    }

    /// Batch of one, shape (1, 3, 224, 224), on `device`
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let side = INPUT_SIZE as usize;
        Tensor::from_slice(&self.data, (1, 3, side, side), device)
            .map_err(|e| Error::computation(format!("Failed to build input tensor: {}", e)))
    }
}

/// Image to tensor transform used for both inference and saliency
#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocessor;

impl Preprocessor {
    /// Create the standard transform
    pub fn new() -> Self {
        Self
    }

    /// Run resize, crop, scale and normalize in that order
    ///
    /// Fails with [`Error::InvalidInput`] when the aspect ratio is so extreme
    /// that the resized long edge would exceed [`MAX_RESIZED_EDGE`].
    pub fn transform(&self, image: &RgbImage) -> Result<InputTensor> {
        let resized = resize_shorter_edge(image, RESIZE_SHORTER)?;
        let cropped = center_crop(&resized, INPUT_SIZE);
        Ok(InputTensor {
            data: normalize(&cropped),
        })
    }
}

/// Output size when the shorter edge becomes `target`, long edge truncated
pub fn shorter_edge_size(width: u32, height: u32, target: u32) -> Result<(u32, u32)> {
    if width == 0 || height == 0 {
        return Err(Error::invalid_input(format!(
            "Image has no pixels ({}x{})",
            width, height
        )));
    }

    let (long, short) = (width.max(height), width.min(height));
    let scaled = u64::from(target) * u64::from(long) / u64::from(short);
    let scaled = u32::try_from(scaled)
        .ok()
        .filter(|edge| *edge <= MAX_RESIZED_EDGE)
        .ok_or_else(|| {
            Error::invalid_input(format!(
                "Image aspect ratio {}x{} is too extreme to process",
                width, height
            ))
        })?;

    if width <= height {
        Ok((target, scaled))
    } else {
        Ok((scaled, target))
    }
}

/// Bilinear, antialiased resize keeping the aspect ratio
pub fn resize_shorter_edge(image: &RgbImage, target: u32) -> Result<RgbImage> {
    let (w, h) = shorter_edge_size(image.width(), image.height(), target)?;
    if (w, h) == image.dimensions() {
        return Ok(image.clone());
    }
    Ok(imageops::resize(image, w, h, FilterType::Triangle))
}

/// Offset of a centered window, rounding a half pixel to the even side
pub fn crop_offset(size: u32, crop: u32) -> u32 {
    let diff = size.saturating_sub(crop);
    let half = diff / 2;
    if diff % 2 == 1 && half % 2 == 1 {
        half + 1
    } else {
        half
    }
}

/// Centered square crop of side `size`
pub fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let left = crop_offset(image.width(), size);
    let top = crop_offset(image.height(), size);
    imageops::crop_imm(image, left, top, size, size).to_image()
}

/// Scale to [0, 1] and normalize each channel, CHW layout
fn normalize(image: &RgbImage) -> Vec<f32> {
    let num_pixels = (image.width() * image.height()) as usize;
    let mut normalized = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            let scaled = f32::from(pixel[c]) / 255.0;
            normalized[c * num_pixels + i] = (scaled - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    normalized
}
