// THEORY:
// The `config` module holds every tunable the detection pipeline reads. Two
// kinds of configuration exist and they are deliberately kept apart:
//
// 1.  **`HoleDetectionConfig`** shapes cacheable results. Its content hash is part
//     of the filtering-stage cache key, so the hash covers the whole serialized
//     struct. Adding a field can therefore never produce a stale cache hit.
// 2.  **`ScoringOverrides`** are per-invocation tuning knobs for the (never cached)
//     scoring stage. They replace process-wide debug toggles: an override only
//     lives as long as the call it is passed to.

use crate::error::{VisionError, VisionResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Inclusive diameter range in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiameterRange {
    pub min: f64,
    pub max: f64,
}

impl DiameterRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, diameter: f64) -> bool {
        diameter >= self.min && diameter <= self.max
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Configuration for the hole detection stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoleDetectionConfig {
    /// Effective diameter a real hole may have, in pixels.
    pub expected_hole_diameter_pixels: DiameterRange,
    /// Minimum `4π·area/perimeter²` for a contour to count as round.
    pub min_circularity: f64,
    /// Reject candidates lying on a scoring ring line.
    pub filter_scoring_ring_artifacts: bool,
    /// Normalized distance from a ring line within which a candidate is rejected.
    pub scoring_ring_tolerance: f64,
    /// Factor the candidate's darkness relative to its surroundings into confidence.
    pub use_local_background: bool,
    /// Inner annulus radius as a multiple of the candidate radius.
    pub background_inner_radius_factor: f64,
    /// Outer annulus radius as a multiple of the candidate radius.
    pub background_outer_radius_factor: f64,
    /// Contours with fewer boundary points are discarded.
    pub min_contour_points: usize,
}

impl Default for HoleDetectionConfig {
    fn default() -> Self {
        Self {
            expected_hole_diameter_pixels: DiameterRange::new(8.0, 16.0),
            min_circularity: 0.5,
            filter_scoring_ring_artifacts: true,
            scoring_ring_tolerance: 0.02,
            use_local_background: false,
            background_inner_radius_factor: 1.5,
            background_outer_radius_factor: 3.0,
            min_contour_points: 6,
        }
    }
}

impl HoleDetectionConfig {
    /// Checks ranges and finiteness. Called by the pipeline before any stage runs.
    pub fn validate(&self) -> VisionResult<()> {
        let range = &self.expected_hole_diameter_pixels;
        if !range.min.is_finite() || !range.max.is_finite() || range.min < 0.0 || range.min > range.max {
            return Err(VisionError::InvalidConfig(format!(
                "expected hole diameter range {}..={} is not a valid range",
                range.min, range.max
            )));
        }
        if !(0.0..=1.0).contains(&self.min_circularity) {
            return Err(VisionError::InvalidConfig(format!(
                "min_circularity {} must lie in [0, 1]",
                self.min_circularity
            )));
        }
        if !self.scoring_ring_tolerance.is_finite() || self.scoring_ring_tolerance < 0.0 {
            return Err(VisionError::InvalidConfig(format!(
                "scoring_ring_tolerance {} must be a non-negative number",
                self.scoring_ring_tolerance
            )));
        }
        if !(self.background_inner_radius_factor >= 0.0
            && self.background_outer_radius_factor >= self.background_inner_radius_factor
            && self.background_outer_radius_factor.is_finite())
        {
            return Err(VisionError::InvalidConfig(format!(
                "background annulus factors {}..{} are not a valid range",
                self.background_inner_radius_factor, self.background_outer_radius_factor
            )));
        }
        if self.min_contour_points < 3 {
            return Err(VisionError::InvalidConfig(format!(
                "min_contour_points {} is below the 3 points a closed contour needs",
                self.min_contour_points
            )));
        }
        Ok(())
    }

    /// Stable hex SHA-256 over the full serialized configuration.
    pub fn content_hash(&self) -> String {
        // Field order is fixed by the struct definition, so the JSON bytes are stable.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    pub fn from_json_str(json: &str) -> VisionResult<Self> {
        let config: HoleDetectionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> VisionResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-invocation overrides for the scoring stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringOverrides {
    /// Overrides `HoleDetectionConfig::use_local_background` for this call only.
    pub use_local_background: Option<bool>,
    /// Overrides the circularity considered ideal (0.8 by default).
    pub ideal_circularity: Option<f64>,
    /// Candidates scoring below this confidence are dropped from the output.
    pub min_confidence: Option<f64>,
}
