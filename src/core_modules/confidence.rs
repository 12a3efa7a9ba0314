// THEORY:
// The `confidence` module ranks the candidates that survived filtering. Every
// survivor starts fully trusted (1.0) and loses trust multiplicatively for each
// way it deviates from an ideal hole:
//
// 1.  **Roundness**: circularity relative to an ideal of 0.8, capped at 1. Torn
//     paper around a real hole rarely traces rounder than that.
// 2.  **Size**: distance of the diameter from the middle of the expected range,
//     as a fraction of that midpoint, floored at 0.5.
// 3.  **Darkness** (optional): the candidate's center intensity against its own
//     annulus background, as a z-score mapped to [0.3, 1].
//
// Scoring is never cached: it is cheap and it reads per-invocation overrides.
// The output order is confidence-descending with ties kept in contour order.

use crate::config::{HoleDetectionConfig, ScoringOverrides};
use crate::core_modules::candidate_filter::FilteredCandidate;
use crate::core_modules::geometry::{NormalizedTargetPosition, PixelPoint};
use crate::core_modules::grayscale::grayscale::GrayscaleBuffer;
use crate::core_modules::local_background::{self, LocalBackground};
use crate::core_modules::preprocess::EdgeMap;
use crate::core_modules::target::TargetScorer;
use serde::Serialize;

const IDEAL_CIRCULARITY: f64 = 0.8;
const MIN_SIZE_FACTOR: f64 = 0.5;
const MIN_BACKGROUND_FACTOR: f64 = 0.3;
/// z-score at which the darkness factor saturates.
const FULL_CONFIDENCE_Z: f64 = 3.0;

/// The measurements behind a confidence value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateFeatures {
    pub circularity: f64,
    pub diameter: f64,
    pub aspect_ratio: f64,
    pub circularity_factor: f64,
    pub size_factor: f64,
    /// Present only when local-background scoring ran.
    pub background_factor: Option<f64>,
    pub local_background: Option<LocalBackground>,
    pub center_intensity: Option<f64>,
    /// Mean gradient magnitude along the outline, when an edge map exists.
    pub edge_strength: Option<f64>,
}

/// A ranked bullet-hole candidate, the terminal output of detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedHoleCandidate {
    pub pixel_position: PixelPoint,
    pub target_position: NormalizedTargetPosition,
    pub radius_pixels: f64,
    /// In [0, 1].
    pub confidence: f64,
    pub features: CandidateFeatures,
    /// Score the position earns on the target.
    pub score: u32,
}

pub struct ConfidenceScorer<'a> {
    pub grayscale: &'a GrayscaleBuffer,
    pub edge_map: Option<&'a EdgeMap>,
    pub target: &'a dyn TargetScorer,
    pub config: &'a HoleDetectionConfig,
    pub overrides: &'a ScoringOverrides,
}

impl ConfidenceScorer<'_> {
    pub fn score_all(&self, candidates: &[FilteredCandidate]) -> Vec<DetectedHoleCandidate> {
        let mut scored: Vec<DetectedHoleCandidate> =
            candidates.iter().filter(|c| c.is_accepted()).map(|c| self.score(c)).collect();
        if let Some(floor) = self.overrides.min_confidence {
            scored.retain(|c| c.confidence >= floor);
        }
        // `sort_by` is stable: equal confidences keep contour order.
        scored.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        scored
    }

    pub fn score(&self, candidate: &FilteredCandidate) -> DetectedHoleCandidate {
        let contour = &candidate.contour;
        let ideal = self.overrides.ideal_circularity.unwrap_or(IDEAL_CIRCULARITY);
        let circularity_factor = circularity_factor(contour.circularity, ideal);
        let size_factor = size_factor(candidate.diameter, self.config.expected_hole_diameter_pixels.midpoint());

        let radius = candidate.diameter / 2.0;
        let use_background = self.overrides.use_local_background.unwrap_or(self.config.use_local_background);
        let center_intensity = center_intensity(self.grayscale, contour.center_pixel);
        let (local_background, background_factor) = match (use_background, center_intensity) {
            (true, Some(intensity)) => {
                let background = local_background::estimate(
                    contour.center_pixel,
                    self.grayscale,
                    radius * self.config.background_inner_radius_factor,
                    radius * self.config.background_outer_radius_factor,
                );
                let factor = background_factor(background.z_score(intensity));
                (Some(background), Some(factor))
            }
            _ => (None, None),
        };

        let confidence = (circularity_factor * size_factor * background_factor.unwrap_or(1.0)).clamp(0.0, 1.0);
        let edge_strength = self.edge_map.map(|map| map.mean_along(&contour.points));

        DetectedHoleCandidate {
            pixel_position: contour.center_pixel,
            target_position: candidate.target_position,
            radius_pixels: radius,
            confidence,
            features: CandidateFeatures {
                circularity: contour.circularity,
                diameter: candidate.diameter,
                aspect_ratio: contour.aspect_ratio,
                circularity_factor,
                size_factor,
                background_factor,
                local_background,
                center_intensity,
                edge_strength,
            },
            score: self.target.score(&candidate.target_position),
        }
    }
}

pub fn circularity_factor(circularity: f64, ideal: f64) -> f64 {
    if ideal <= 0.0 {
        return 1.0;
    }
    (circularity / ideal).clamp(0.0, 1.0)
}

pub fn size_factor(diameter: f64, midpoint: f64) -> f64 {
    if midpoint <= 0.0 {
        return MIN_SIZE_FACTOR;
    }
    (1.0 - (diameter - midpoint).abs() / midpoint).max(MIN_SIZE_FACTOR)
}

pub fn background_factor(z_score: f64) -> f64 {
    (z_score / FULL_CONFIDENCE_Z).clamp(MIN_BACKGROUND_FACTOR, 1.0)
}

/// Mean of the in-bounds 3x3 neighborhood around the center.
fn center_intensity(image: &GrayscaleBuffer, center: PixelPoint) -> Option<f64> {
    let (cx, cy) = (center.x.round() as i64, center.y.round() as i64);
    let samples: Vec<f64> = (-1..=1)
        .flat_map(|dy| (-1..=1).map(move |dx| (cx + dx, cy + dy)))
        .filter_map(|(x, y)| image.get_checked(x, y))
        .map(f64::from)
        .collect();
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::contour::DetectedContour;
    use crate::core_modules::target::TargetType;

    fn candidate(cx: f64, cy: f64, r: f64) -> FilteredCandidate {
        let points: Vec<PixelPoint> = (0..32)
            .map(|i| {
                let a = i as f64 / 32.0 * std::f64::consts::TAU;
                PixelPoint::new(cx + r * a.cos(), cy + r * a.sin())
            })
            .collect();
        let contour = DetectedContour::measure(points).expect("32 points");
        FilteredCandidate {
            diameter: contour.effective_diameter(),
            target_position: NormalizedTargetPosition::new((cx - 50.0) / 50.0, (50.0 - cy) / 50.0),
            contour,
            rejection: None,
        }
    }

    fn speckled_paper_with_hole(cx: i64, cy: i64, r: i64) -> GrayscaleBuffer {
        let pixels = (0..100 * 100)
            .map(|i: i64| {
                let (x, y) = (i % 100, i / 100);
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    15
                } else if (x + y) % 2 == 0 {
                    210
                } else {
                    230
                }
            })
            .collect();
        GrayscaleBuffer::new(100, 100, pixels).expect("100x100")
    }

    #[test]
    fn factor_formulas() {
        assert_eq!(circularity_factor(0.4, 0.8), 0.5);
        assert_eq!(circularity_factor(0.95, 0.8), 1.0);
        assert_eq!(size_factor(12.0, 12.0), 1.0);
        assert_eq!(size_factor(9.0, 12.0), 0.75);
        assert_eq!(size_factor(40.0, 12.0), 0.5);
        assert_eq!(background_factor(6.0), 1.0);
        assert_eq!(background_factor(1.5), 0.5);
        assert_eq!(background_factor(-2.0), 0.3);
    }

    #[test]
    fn results_sorted_by_confidence_with_stable_ties() {
        let gray = GrayscaleBuffer::filled(100, 100, 200);
        let config = HoleDetectionConfig::default();
        let overrides = ScoringOverrides::default();
        let scorer = ConfidenceScorer {
            grayscale: &gray,
            edge_map: None,
            target: &TargetType::Generic,
            config: &config,
            overrides: &overrides,
        };
        // Two identical mid-size holes around a smaller, lower-confidence one.
        let first = candidate(20.0, 20.0, 6.0);
        let mut twin = first.clone();
        twin.contour.center_pixel = PixelPoint::new(80.0, 80.0);
        let candidates = vec![first, candidate(50.0, 50.0, 4.0), twin];
        let scored = scorer.score_all(&candidates);
        assert_eq!(scored.len(), 3);
        assert!(scored[0].confidence >= scored[1].confidence && scored[1].confidence >= scored[2].confidence);
        assert_eq!(scored[0].pixel_position.x.round(), 20.0);
        assert_eq!(scored[1].pixel_position.x.round(), 80.0);
        assert_eq!(scored[2].pixel_position.x.round(), 50.0);
        assert_eq!(scored[2].score, 10);
    }

    #[test]
    fn local_background_rewards_dark_holes() {
        let gray = speckled_paper_with_hole(50, 50, 6);
        let config = HoleDetectionConfig { use_local_background: true, ..Default::default() };
        let overrides = ScoringOverrides::default();
        let scorer = ConfidenceScorer {
            grayscale: &gray,
            edge_map: None,
            target: &TargetType::Generic,
            config: &config,
            overrides: &overrides,
        };
        let scored = scorer.score(&candidate(50.0, 50.0, 6.0));
        assert_eq!(scored.features.background_factor, Some(1.0));
        assert!(scored.features.local_background.is_some());
        assert!(scored.confidence > 0.9);
    }

    #[test]
    fn overrides_apply_to_single_call() {
        let gray = GrayscaleBuffer::filled(100, 100, 200);
        let config = HoleDetectionConfig::default();
        let overrides = ScoringOverrides {
            use_local_background: Some(true),
            min_confidence: Some(0.5),
            ..Default::default()
        };
        let scorer = ConfidenceScorer {
            grayscale: &gray,
            edge_map: None,
            target: &TargetType::Generic,
            config: &config,
            overrides: &overrides,
        };
        // Flat background: z-score 0, factor floors at 0.3, below the 0.5 confidence floor.
        assert!(scorer.score_all(&[candidate(50.0, 50.0, 6.0)]).is_empty());
        assert!(!config.use_local_background);
    }

    #[test]
    fn rejected_candidates_are_not_scored() {
        let gray = GrayscaleBuffer::filled(100, 100, 200);
        let config = HoleDetectionConfig::default();
        let overrides = ScoringOverrides::default();
        let scorer = ConfidenceScorer {
            grayscale: &gray,
            edge_map: None,
            target: &TargetType::Generic,
            config: &config,
            overrides: &overrides,
        };
        let mut rejected = candidate(50.0, 50.0, 6.0);
        rejected.rejection = Some(crate::core_modules::candidate_filter::RejectionReason::LowCircularity {
            circularity: 0.1,
            minimum: 0.5,
        });
        assert!(scorer.score_all(&[rejected]).is_empty());
    }
}
