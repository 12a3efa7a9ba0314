// THEORY:
// The `quality` module is the gatekeeper in front of the expensive detection
// stages. A blurry, washed-out or underexposed photo of a target produces
// garbage contours, so before anything else we measure the photo and decide
// whether detection is worth attempting.
//
// Key architectural principles:
// 1.  **Four Independent Lenses**: sharpness (Laplacian response variance),
//     contrast (intensity standard deviation), brightness (mean intensity) and
//     noise (median of local block variances). None of them reads another's
//     output, so the async entry point runs them as parallel blocking tasks and
//     joins them before exposure is classified from brightness.
// 2.  **Fixed Normalizers**: each raw metric is divided by an empirical constant
//     and clamped to [0, 1]. No per-image calibration, so scores are comparable
//     across sessions.
// 3.  **Two Separate Policies**: the detection gate (`is_acceptable_for_detection`)
//     and the display score (`overall_score`) are independent. The gate is a hard
//     AND of thresholds; the score is a weighted sum for the UI.
// 4.  **Degrade, Never Fail**: an empty or undecodable image yields a neutral
//     assessment instead of an error.

use crate::core_modules::grayscale::grayscale::GrayscaleBuffer;
use image::DynamicImage;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;

const LAPLACIAN: [[i32; 3]; 3] = [[0, 1, 0], [1, -4, 1], [0, 1, 0]];
const SHARPNESS_NORMALIZER: f64 = 500.0;
/// Half of the 8-bit dynamic range.
const CONTRAST_NORMALIZER: f64 = 64.0;
const NOISE_NORMALIZER: f64 = 20.0;
const NOISE_BLOCK_SIZE: u32 = 5;
const NOISE_GRID_DIVISIONS: u32 = 20;

const UNDEREXPOSED_BELOW: f64 = 0.25;
const OVEREXPOSED_ABOVE: f64 = 0.75;

const MIN_SHARPNESS: f64 = 0.3;
const MIN_CONTRAST: f64 = 0.2;
const MAX_NOISE: f64 = 0.5;

const WEIGHT_SHARPNESS: f64 = 0.35;
const WEIGHT_CONTRAST: f64 = 0.25;
const WEIGHT_EXPOSURE: f64 = 0.25;
const WEIGHT_NOISE: f64 = 0.15;

const GOOD_LEVEL: f64 = 0.7;
const ACCEPTABLE_LEVEL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Exposure {
    Underexposed,
    Good,
    Overexposed,
}

impl Exposure {
    pub fn from_brightness(brightness: f64) -> Self {
        if brightness < UNDEREXPOSED_BELOW {
            Exposure::Underexposed
        } else if brightness > OVEREXPOSED_ABOVE {
            Exposure::Overexposed
        } else {
            Exposure::Good
        }
    }
}

/// Display bucket derived from `overall_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityLevel {
    Good,
    Acceptable,
    Poor,
}

/// Measured quality of a single photo. All scores lie in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub sharpness: f64,
    pub contrast: f64,
    pub brightness: f64,
    pub noise_level: f64,
    pub exposure: Exposure,
}

impl QualityAssessment {
    /// Returned when there is nothing to measure.
    pub fn neutral() -> Self {
        Self {
            sharpness: 0.5,
            contrast: 0.5,
            brightness: 0.5,
            noise_level: 0.3,
            exposure: Exposure::Good,
        }
    }

    /// Hard gate in front of hole detection.
    pub fn is_acceptable_for_detection(&self) -> bool {
        self.sharpness > MIN_SHARPNESS && self.contrast > MIN_CONTRAST && self.exposure == Exposure::Good
    }

    /// Weighted score for display only; never used by the gate.
    pub fn overall_score(&self) -> f64 {
        let exposure = if self.exposure == Exposure::Good { 1.0 } else { 0.0 };
        WEIGHT_SHARPNESS * self.sharpness
            + WEIGHT_CONTRAST * self.contrast
            + WEIGHT_EXPOSURE * exposure
            + WEIGHT_NOISE * (1.0 - self.noise_level)
    }

    pub fn quality_level(&self) -> QualityLevel {
        let score = self.overall_score();
        if score >= GOOD_LEVEL {
            QualityLevel::Good
        } else if score >= ACCEPTABLE_LEVEL {
            QualityLevel::Acceptable
        } else {
            QualityLevel::Poor
        }
    }

    /// One remediation hint per failing metric, empty when every metric passes.
    pub fn guidance(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if self.sharpness <= MIN_SHARPNESS {
            hints.push("Image is blurry. Hold the camera steady and tap the target to focus.".to_string());
        }
        if self.contrast <= MIN_CONTRAST {
            hints.push("Low contrast. Photograph the target against even light without glare.".to_string());
        }
        match self.exposure {
            Exposure::Underexposed => {
                hints.push("Image is too dark. Move to a brighter spot or turn on more light.".to_string())
            }
            Exposure::Overexposed => {
                hints.push("Image is too bright. Avoid direct sunlight or flash on the target.".to_string())
            }
            Exposure::Good => {}
        }
        if self.noise_level > MAX_NOISE {
            hints.push("Image is grainy. Add light so the camera can use a lower ISO.".to_string());
        }
        hints
    }

    /// All guidance joined into one message, `None` if there is nothing to say.
    pub fn guidance_text(&self) -> Option<String> {
        let hints = self.guidance();
        if hints.is_empty() { None } else { Some(hints.join(" ")) }
    }
}

/// Stateless quality analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAssessor;

impl QualityAssessor {
    pub fn new() -> Self {
        Self
    }

    /// Runs the four metrics as parallel blocking tasks and joins them.
    pub async fn assess(&self, image: Arc<GrayscaleBuffer>) -> QualityAssessment {
        if image.width == 0 || image.height == 0 {
            return QualityAssessment::neutral();
        }

        let (sharp_img, contrast_img, bright_img, noise_img) =
            (image.clone(), image.clone(), image.clone(), image);
        let (sharpness, contrast, brightness, noise_level) = tokio::join!(
            tokio::task::spawn_blocking(move || sharpness(&sharp_img)),
            tokio::task::spawn_blocking(move || contrast(&contrast_img)),
            tokio::task::spawn_blocking(move || brightness(&bright_img)),
            tokio::task::spawn_blocking(move || noise_level(&noise_img)),
        );

        match (sharpness, contrast, brightness, noise_level) {
            (Ok(sharpness), Ok(contrast), Ok(brightness), Ok(noise_level)) => {
                let assessment = QualityAssessment {
                    sharpness,
                    contrast,
                    brightness,
                    noise_level,
                    exposure: Exposure::from_brightness(brightness),
                };
                debug!("quality assessed: {:?}", assessment);
                assessment
            }
            _ => {
                warn!("quality metric task failed, using neutral assessment");
                QualityAssessment::neutral()
            }
        }
    }

    /// Same metrics computed on the calling thread.
    pub fn assess_blocking(&self, image: &GrayscaleBuffer) -> QualityAssessment {
        if image.width == 0 || image.height == 0 {
            return QualityAssessment::neutral();
        }
        let brightness = brightness(image);
        QualityAssessment {
            sharpness: sharpness(image),
            contrast: contrast(image),
            brightness,
            noise_level: noise_level(image),
            exposure: Exposure::from_brightness(brightness),
        }
    }

    pub async fn assess_image(&self, image: &DynamicImage) -> QualityAssessment {
        self.assess(Arc::new(GrayscaleBuffer::from_image(image))).await
    }

    /// Decodes and assesses encoded image bytes. Undecodable input degrades to neutral.
    pub async fn assess_encoded(&self, bytes: &[u8]) -> QualityAssessment {
        match image::load_from_memory(bytes) {
            Ok(image) => self.assess_image(&image).await,
            Err(err) => {
                warn!("quality assessment could not decode image: {err}");
                QualityAssessment::neutral()
            }
        }
    }
}

/// Variance of the 4-neighbor Laplacian over interior pixels, normalized.
pub fn sharpness(image: &GrayscaleBuffer) -> f64 {
    if image.width < 3 || image.height < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for y in 1..image.height - 1 {
        for x in 1..image.width - 1 {
            let mut response = 0i32;
            for (ky, row) in LAPLACIAN.iter().enumerate() {
                for (kx, &weight) in row.iter().enumerate() {
                    if weight != 0 {
                        response += weight * image.get(x + kx as u32 - 1, y + ky as u32 - 1) as i32;
                    }
                }
            }
            let r = response as f64;
            sum += r;
            sum_sq += r * r;
            count += 1;
        }
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    (variance / SHARPNESS_NORMALIZER).clamp(0.0, 1.0)
}

/// Intensity standard deviation over half the dynamic range.
pub fn contrast(image: &GrayscaleBuffer) -> f64 {
    let (_, std_dev) = mean_and_std_dev(image.pixels().iter().map(|&v| v as f64));
    (std_dev / CONTRAST_NORMALIZER).clamp(0.0, 1.0)
}

pub fn brightness(image: &GrayscaleBuffer) -> f64 {
    let (mean, _) = mean_and_std_dev(image.pixels().iter().map(|&v| v as f64));
    (mean / 255.0).clamp(0.0, 1.0)
}

/// Median 5x5 block variance over a sparse grid, as `sqrt(median) / 20`.
/// The median keeps real target edges from dominating the estimate.
pub fn noise_level(image: &GrayscaleBuffer) -> f64 {
    if image.width < NOISE_BLOCK_SIZE || image.height < NOISE_BLOCK_SIZE {
        return 0.0;
    }
    let step = (image.width.min(image.height) / NOISE_GRID_DIVISIONS).max(1) as usize;
    let mut variances = Vec::new();
    for y in (0..=image.height - NOISE_BLOCK_SIZE).step_by(step) {
        for x in (0..=image.width - NOISE_BLOCK_SIZE).step_by(step) {
            let block = (0..NOISE_BLOCK_SIZE)
                .flat_map(|dy| (0..NOISE_BLOCK_SIZE).map(move |dx| (x + dx, y + dy)))
                .map(|(px, py)| image.get(px, py) as f64);
            let (_, std_dev) = mean_and_std_dev(block);
            variances.push(std_dev * std_dev);
        }
    }
    if variances.is_empty() {
        return 0.0;
    }
    variances.sort_by(|a, b| a.total_cmp(b));
    let median = variances[variances.len() / 2];
    (median.sqrt() / NOISE_NORMALIZER).clamp(0.0, 1.0)
}

/// Population mean and standard deviation; `(0, 0)` for an empty sample.
pub(crate) fn mean_and_std_dev<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        count += 1;
        sum += v;
        sum_sq += v * v;
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    (mean, variance.sqrt())
}
