// THEORY:
// A bullet hole is only "dark" relative to the paper around it. Printed black
// aiming marks, shadows and uneven lighting make a single global threshold
// useless, so each candidate is compared against its own neighborhood.
//
// The neighborhood is an annulus: every pixel whose rounded distance from the
// candidate center lies between an inner and an outer radius. The inner radius
// keeps the hole's own interior out of the estimate.

use crate::core_modules::geometry::PixelPoint;
use crate::core_modules::grayscale::grayscale::GrayscaleBuffer;
use crate::core_modules::quality::mean_and_std_dev;
use log::warn;
use serde::Serialize;

/// Mid-gray with a typical paper spread, used when the annulus is empty.
const FALLBACK_MEAN: f64 = 128.0;
const FALLBACK_STD_DEV: f64 = 30.0;
const DEFAULT_SIGMA_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocalBackground {
    pub mean_intensity: f64,
    pub std_dev: f64,
}

impl LocalBackground {
    pub fn fallback() -> Self {
        Self {
            mean_intensity: FALLBACK_MEAN,
            std_dev: FALLBACK_STD_DEV,
        }
    }

    /// How many local standard deviations `intensity` is darker than the
    /// background. Zero when the background has no spread.
    pub fn z_score(&self, intensity: f64) -> f64 {
        if self.std_dev == 0.0 {
            return 0.0;
        }
        (self.mean_intensity - intensity) / self.std_dev
    }

    pub fn is_dark_enough(&self, intensity: f64) -> bool {
        self.is_dark_enough_with(intensity, DEFAULT_SIGMA_THRESHOLD)
    }

    pub fn is_dark_enough_with(&self, intensity: f64, sigma_threshold: f64) -> bool {
        self.z_score(intensity) >= sigma_threshold
    }
}

/// Samples the annulus `[inner_radius, outer_radius]` around `center`.
pub fn estimate(
    center: PixelPoint,
    image: &GrayscaleBuffer,
    inner_radius: f64,
    outer_radius: f64,
) -> LocalBackground {
    let outer = outer_radius.max(0.0).ceil() as i64;
    let cx = center.x.round() as i64;
    let cy = center.y.round() as i64;

    let mut samples = Vec::new();
    for dy in -outer..=outer {
        for dx in -outer..=outer {
            let px = cx + dx;
            let py = cy + dy;
            let distance = ((px as f64 - center.x).powi(2) + (py as f64 - center.y).powi(2))
                .sqrt()
                .round();
            if distance < inner_radius || distance > outer_radius {
                continue;
            }
            if let Some(value) = image.get_checked(px, py) {
                samples.push(value as f64);
            }
        }
    }

    if samples.is_empty() {
        warn!("empty background annulus around ({:.1}, {:.1}), using fallback", center.x, center.y);
        return LocalBackground::fallback();
    }
    let (mean_intensity, std_dev) = mean_and_std_dev(samples);
    LocalBackground { mean_intensity, std_dev }
}
