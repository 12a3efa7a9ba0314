// THEORY:
// The `candidate_filter` turns raw contours into hole candidates by rejecting
// everything that cannot be a bullet hole. Three checks run in a fixed order and
// the first failure wins, so each rejected candidate carries exactly one reason:
//
// 1.  **Size**: the equal-area diameter must fall in the expected hole range.
// 2.  **Shape**: circularity must reach the configured minimum.
// 3.  **Ring artifacts**: printed ring lines and paper creases along them trace
//     as thin round contours. A candidate whose elliptical distance from the
//     target center sits on a scoring ring radius is rejected.
//
// Rejected candidates are kept (not dropped) so tuning sessions can show why a
// visible hole was missed.

use crate::config::{DiameterRange, HoleDetectionConfig};
use crate::core_modules::contour::DetectedContour;
use crate::core_modules::geometry::{CropGeometry, NormalizedTargetPosition};
use crate::core_modules::target::TargetScorer;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RejectionReason {
    DiameterOutOfRange { diameter: f64, expected: DiameterRange },
    LowCircularity { circularity: f64, minimum: f64 },
    OnScoringRing { ring_radius: f64, distance: f64 },
}

impl RejectionReason {
    pub fn describe(&self) -> String {
        match self {
            RejectionReason::DiameterOutOfRange { diameter, expected } => format!(
                "diameter {diameter:.1}px outside {:.1}..{:.1}px",
                expected.min, expected.max
            ),
            RejectionReason::LowCircularity { circularity, minimum } => {
                format!("circularity {circularity:.2} below {minimum:.2}")
            }
            RejectionReason::OnScoringRing { ring_radius, distance } => {
                format!("distance {distance:.3} lies on scoring ring {ring_radius:.3}")
            }
        }
    }
}

/// A contour placed on the target, with its filtering verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredCandidate {
    pub contour: DetectedContour,
    pub target_position: NormalizedTargetPosition,
    pub diameter: f64,
    pub rejection: Option<RejectionReason>,
}

impl FilteredCandidate {
    pub fn is_accepted(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Output of the filtering stage, cached per image and configuration.
#[derive(Debug, Clone, Default)]
pub struct FilteringResult {
    /// Survivors, in contour order.
    pub accepted: Vec<FilteredCandidate>,
    /// Rejected candidates, kept for diagnostics.
    pub rejected: Vec<FilteredCandidate>,
}

pub fn filter_candidates(
    contours: &[DetectedContour],
    crop: &CropGeometry,
    target: &dyn TargetScorer,
    config: &HoleDetectionConfig,
) -> FilteringResult {
    let mut result = FilteringResult::default();
    for contour in contours {
        let target_position = crop.to_target(contour.center_pixel);
        let diameter = contour.effective_diameter();
        let rejection = rejection_for(contour, diameter, &target_position, target, config);
        let candidate = FilteredCandidate {
            contour: contour.clone(),
            target_position,
            diameter,
            rejection,
        };
        if candidate.is_accepted() {
            result.accepted.push(candidate);
        } else {
            result.rejected.push(candidate);
        }
    }
    result
}

fn rejection_for(
    contour: &DetectedContour,
    diameter: f64,
    position: &NormalizedTargetPosition,
    target: &dyn TargetScorer,
    config: &HoleDetectionConfig,
) -> Option<RejectionReason> {
    let expected = config.expected_hole_diameter_pixels;
    if !expected.contains(diameter) {
        return Some(RejectionReason::DiameterOutOfRange { diameter, expected });
    }
    if contour.circularity < config.min_circularity {
        return Some(RejectionReason::LowCircularity {
            circularity: contour.circularity,
            minimum: config.min_circularity,
        });
    }
    if config.filter_scoring_ring_artifacts {
        let distance = position.radial_distance();
        let tolerance = config.scoring_ring_tolerance;
        // Rings narrower than the tolerance (rifle ten dot) cannot be told apart from a center hit.
        let on_ring = target
            .ring_radii()
            .iter()
            .find(|&&ring| ring > tolerance && (distance - ring).abs() <= tolerance);
        if let Some(&ring_radius) = on_ring {
            return Some(RejectionReason::OnScoringRing { ring_radius, distance });
        }
    }
    None
}
