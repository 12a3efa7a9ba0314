// THEORY:
// The `target` module is the boundary to the target-type collaborator. The
// detection pipeline and the statistics engine only ever need three things from
// a target: where its scoring rings are (to reject ring-boundary artifacts),
// what a position scores, and which scores are possible at all.
//
// Those three questions are the `TargetScorer` trait. The built-in `TargetType`
// enum covers the common 10-ring paper targets; other target families plug in
// by implementing the trait.

use crate::core_modules::geometry::NormalizedTargetPosition;
use serde::{Deserialize, Serialize};

/// ISSF 10m air pistol: 11.5mm ten ring, 8mm ring spacing, 155.5mm outer ring.
const AIR_PISTOL_RADII: [f64; 10] = [
    5.75 / 77.75,
    13.75 / 77.75,
    21.75 / 77.75,
    29.75 / 77.75,
    37.75 / 77.75,
    45.75 / 77.75,
    53.75 / 77.75,
    61.75 / 77.75,
    69.75 / 77.75,
    1.0,
];

/// ISSF 10m air rifle: 0.5mm ten dot, 2.5mm ring spacing, 45.5mm outer ring.
const AIR_RIFLE_RADII: [f64; 10] = [
    0.25 / 22.75,
    2.75 / 22.75,
    5.25 / 22.75,
    7.75 / 22.75,
    10.25 / 22.75,
    12.75 / 22.75,
    15.25 / 22.75,
    17.75 / 22.75,
    20.25 / 22.75,
    1.0,
];

/// Evenly spaced ten-ring target.
const GENERIC_RADII: [f64; 10] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

/// Scoring knowledge the engine needs from a target family.
pub trait TargetScorer: Send + Sync {
    /// Normalized ring radii, ascending. The first entry bounds the highest
    /// score, the last is the outer scoring edge.
    fn ring_radii(&self) -> &[f64];

    /// Highest score a single shot can earn.
    fn max_score(&self) -> u32 {
        self.ring_radii().len() as u32
    }

    /// Score for a shot centered at `position`. A shot exactly on a ring line
    /// takes the higher score; anything outside the outer ring scores 0.
    fn score(&self, position: &NormalizedTargetPosition) -> u32 {
        let r = position.radial_distance();
        if !r.is_finite() {
            return 0;
        }
        match self.ring_radii().iter().position(|&radius| r <= radius) {
            Some(index) => self.max_score() - index as u32,
            None => 0,
        }
    }

    /// Score of a shot in the dead center.
    fn center_score(&self) -> u32 {
        self.score(&NormalizedTargetPosition::CENTER)
    }

    fn is_valid_score(&self, score: u32) -> bool {
        score <= self.max_score()
    }
}

/// Built-in target families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TargetType {
    AirPistol10m,
    AirRifle10m,
    #[default]
    Generic,
}

impl TargetType {
    pub fn name(&self) -> &'static str {
        match self {
            TargetType::AirPistol10m => "10m Air Pistol",
            TargetType::AirRifle10m => "10m Air Rifle",
            TargetType::Generic => "Generic 10-ring",
        }
    }
}

impl TargetScorer for TargetType {
    fn ring_radii(&self) -> &[f64] {
        match self {
            TargetType::AirPistol10m => &AIR_PISTOL_RADII,
            TargetType::AirRifle10m => &AIR_RIFLE_RADII,
            TargetType::Generic => &GENERIC_RADII,
        }
    }
}
