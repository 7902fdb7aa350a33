//! Blur rejection via Laplacian variance
//!
//! Low-information photos (out of focus, blank, uniformly lit) are turned away
//! before any model work happens. The decision is a plain threshold on the
//! variance of the 4-neighbour Laplacian response of the luminance channel.

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use tracing::debug;

/// Variance below which an image is considered blurry
pub const DEFAULT_BLUR_THRESHOLD: f64 = 100.0;

/// Result of a sharpness assessment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    /// Variance of the Laplacian response (0.0 when the image could not be read)
    pub variance: f64,

    /// Whether the image passed the gate
    pub sharp: bool,
}

impl QualityReport {
    fn rejected() -> Self {
        Self {
            variance: 0.0,
            sharp: false,
        }
    }
}

/// Sharpness gate applied to every uploaded image
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    threshold: f64,
}

impl QualityGate {
    /// Create a gate with a custom variance threshold
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Configured variance threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Assess raw encoded bytes. Undecodable input is rejected, never an error.
    pub fn assess(&self, bytes: &[u8]) -> QualityReport {
        match image::load_from_memory(bytes) {
            Ok(image) => self.assess_image(&image),
            Err(e) => {
                debug!("Quality gate could not decode image: {}", e);
                QualityReport::rejected()
            }
        }
    }

    /// Assess an already decoded image
    pub fn assess_image(&self, image: &DynamicImage) -> QualityReport {
        let gray = luminance(&image.to_rgb8());
        let variance = laplacian_variance(&gray);

        if !variance.is_finite() {
            return QualityReport::rejected();
        }

        let sharp = variance >= self.threshold;
        debug!(variance, threshold = self.threshold, sharp, "Quality gate assessed image");
        QualityReport { variance, sharp }
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(DEFAULT_BLUR_THRESHOLD)
    }
}

/// BT.601 luminance rounded to 8 bits
pub fn luminance(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let y = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        Luma([y.round().clamp(0.0, 255.0) as u8])
    })
}

/// Mirror an out-of-range coordinate back inside `[0, len)` without
/// repeating the edge sample (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(i: i64, len: i64) -> u32 {
    if len == 1 {
        return 0;
    }
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= len {
        i = 2 * (len - 1) - i;
    }
    i as u32
}

/// Population variance of the `[0,1,0; 1,-4,1; 0,1,0]` response over every pixel
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = (i64::from(gray.width()), i64::from(gray.height()));
    if w == 0 || h == 0 {
        return 0.0;
    }

    let px = |x: i64, y: i64| f64::from(gray.get_pixel(reflect_101(x, w), reflect_101(y, h)).0[0]);

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for y in 0..h {
        for x in 0..w {
            let response =
                px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let count = (w * h) as f64;
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}
