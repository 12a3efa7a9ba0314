// THEORY:
// The `pattern_analyzer` condenses one group of shots into the numbers a coach
// reads off a target: where the group is centered, how tight it is, and which
// way it drifts.
//
// - **MPI**: the centroid of all shots.
// - **Standard deviation**: root mean squared distance from the MPI.
// - **Extreme spread**: the largest distance between any two shots. This is an
//   O(n²) scan, fine for a single round.
// - **CEP50 / CEP90**: nearest-rank percentiles of the distances from the MPI.
// - **Directional bias**: the MPI's offset from the target center. Above a small
//   fixed threshold it is reported as a clock direction with a coaching hint.
//
// Fewer than three shots carry no dispersion information, so no analysis is
// produced for them. Every analysis is stamped with the algorithm version that
// produced it; stored analyses from older versions report that they need to be
// recomputed.

use crate::core_modules::confidence::DetectedHoleCandidate;
use crate::core_modules::geometry::NormalizedTargetPosition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bumped whenever a formula below changes.
pub const ALGORITHM_VERSION: u32 = 2;
pub const MIN_SHOTS_FOR_ANALYSIS: usize = 3;
/// MPI offset (normalized units) above which a bias is reported.
pub const BIAS_SIGNIFICANCE_THRESHOLD: f64 = 0.08;

/// Anything with a position on the target and a recorded score.
pub trait ShotRecord {
    fn position(&self) -> NormalizedTargetPosition;
    fn score(&self) -> u32;
}

/// A confirmed shot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub position: NormalizedTargetPosition,
    pub score: u32,
}

impl Shot {
    pub fn new(x: f64, y: f64, score: u32) -> Self {
        Self {
            position: NormalizedTargetPosition::new(x, y),
            score,
        }
    }
}

impl ShotRecord for Shot {
    fn position(&self) -> NormalizedTargetPosition {
        self.position
    }

    fn score(&self) -> u32 {
        self.score
    }
}

impl ShotRecord for DetectedHoleCandidate {
    fn position(&self) -> NormalizedTargetPosition {
        self.target_position
    }

    fn score(&self) -> u32 {
        self.score
    }
}

impl<T: ShotRecord + ?Sized> ShotRecord for &T {
    fn position(&self) -> NormalizedTargetPosition {
        (**self).position()
    }

    fn score(&self) -> u32 {
        (**self).score()
    }
}

/// The twelve hour positions of a clock face, 12 o'clock being straight up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockDirection {
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Eleven,
    Twelve,
}

impl ClockDirection {
    const ALL: [ClockDirection; 12] = [
        ClockDirection::One,
        ClockDirection::Two,
        ClockDirection::Three,
        ClockDirection::Four,
        ClockDirection::Five,
        ClockDirection::Six,
        ClockDirection::Seven,
        ClockDirection::Eight,
        ClockDirection::Nine,
        ClockDirection::Ten,
        ClockDirection::Eleven,
        ClockDirection::Twelve,
    ];

    /// `hour` in 1..=12; anything else wraps onto the clock face.
    pub fn from_hour(hour: u32) -> Self {
        let index = (hour + 11) % 12;
        Self::ALL[index as usize]
    }

    /// Maps a mathematical angle (counter-clockwise from +x) to the nearest hour.
    pub fn from_angle_degrees(angle_degrees: f64) -> Self {
        let adjusted = (90.0 - angle_degrees + 360.0).rem_euclid(360.0);
        let hour = (adjusted / 30.0).round() as u32 % 12;
        if hour == 0 { ClockDirection::Twelve } else { Self::from_hour(hour) }
    }

    pub fn hour(&self) -> u32 {
        *self as u32 + 1
    }

    /// Typical cause of a group displaced toward this hour, for a right-handed shooter.
    pub fn coaching_tip(&self) -> &'static str {
        match self {
            ClockDirection::Twelve => "Shots are high: the wrist is breaking upward. Keep the wrist locked through the shot.",
            ClockDirection::One => "High right: heeling, the palm pushes in anticipation of recoil. Let the shot surprise you.",
            ClockDirection::Two => "Right and slightly high: heeling. Relax the heel of the hand and press straight back.",
            ClockDirection::Three => "Shots pull right: too much thumb pressure or too much trigger finger. Ease the thumb and check finger placement.",
            ClockDirection::Four => "Low right: the wrist is breaking down and right. Keep the grip pressure constant.",
            ClockDirection::Five => "Low right: jerking the trigger with the whole hand. Isolate the trigger finger.",
            ClockDirection::Six => "Shots are low: breaking the wrist down or anticipating recoil. Follow through after the shot.",
            ClockDirection::Seven => "Low left: jerking or slapping the trigger. Press smoothly to the rear.",
            ClockDirection::Eight => "Left and slightly low: tightening the fingers while pressing. Hold the grip steady.",
            ClockDirection::Nine => "Shots pull left: too little trigger finger. Place the pad of the finger on the trigger.",
            ClockDirection::Ten => "High left: pushing in anticipation of recoil with no follow-through.",
            ClockDirection::Eleven => "High and slightly left: breaking the wrist upward. Keep the wrist firm.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalBias {
    /// MPI x offset; positive is right.
    pub horizontal_bias: f64,
    /// MPI y offset; positive is up.
    pub vertical_bias: f64,
    pub magnitude: f64,
    /// Only present when the bias is significant.
    pub primary_direction: Option<ClockDirection>,
    pub is_significant: bool,
}

impl DirectionalBias {
    pub fn from_mpi(mpi: NormalizedTargetPosition) -> Self {
        let magnitude = mpi.radial_distance();
        let is_significant = magnitude > BIAS_SIGNIFICANCE_THRESHOLD;
        Self {
            horizontal_bias: mpi.x,
            vertical_bias: mpi.y,
            magnitude,
            primary_direction: is_significant.then(|| ClockDirection::from_angle_degrees(mpi.angle_degrees())),
            is_significant,
        }
    }
}

/// Dispersion statistics of one shot group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub mpi: NormalizedTargetPosition,
    pub standard_deviation: f64,
    pub extreme_spread: f64,
    pub cep50: f64,
    pub cep90: f64,
    pub directional_bias: DirectionalBias,
    pub shot_count: usize,
    pub algorithm_version: u32,
    pub analyzed_at: DateTime<Utc>,
}

impl PatternAnalysis {
    /// True when this analysis was produced by an older algorithm.
    pub fn needs_recomputation(&self) -> bool {
        self.algorithm_version < ALGORITHM_VERSION
    }

    pub fn coaching_text(&self) -> Option<&'static str> {
        self.directional_bias.primary_direction.map(|direction| direction.coaching_tip())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternAnalyzer;

impl PatternAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze<S: ShotRecord>(&self, shots: &[S]) -> Option<PatternAnalysis> {
        self.analyze_at(shots, Utc::now())
    }

    /// Same as `analyze` with a caller-chosen timestamp.
    pub fn analyze_at<S: ShotRecord>(&self, shots: &[S], analyzed_at: DateTime<Utc>) -> Option<PatternAnalysis> {
        if shots.len() < MIN_SHOTS_FOR_ANALYSIS {
            return None;
        }
        let positions: Vec<NormalizedTargetPosition> = shots.iter().map(|shot| shot.position()).collect();
        let mpi = centroid(&positions);

        let mut distances: Vec<f64> = positions.iter().map(|p| p.distance_to(&mpi)).collect();
        let n = distances.len() as f64;
        let standard_deviation = (distances.iter().map(|d| d * d).sum::<f64>() / n).sqrt();
        distances.sort_by(f64::total_cmp);

        Some(PatternAnalysis {
            mpi,
            standard_deviation,
            extreme_spread: extreme_spread(&positions),
            cep50: nearest_rank(&distances, 0.5),
            cep90: nearest_rank(&distances, 0.9),
            directional_bias: DirectionalBias::from_mpi(mpi),
            shot_count: shots.len(),
            algorithm_version: ALGORITHM_VERSION,
            analyzed_at,
        })
    }
}

/// Arithmetic mean of the positions; the target center for an empty slice.
pub fn centroid(positions: &[NormalizedTargetPosition]) -> NormalizedTargetPosition {
    if positions.is_empty() {
        return NormalizedTargetPosition::CENTER;
    }
    let n = positions.len() as f64;
    let (sx, sy) = positions.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    NormalizedTargetPosition::new(sx / n, sy / n)
}

pub fn extreme_spread(positions: &[NormalizedTargetPosition]) -> f64 {
    let mut widest: f64 = 0.0;
    for (i, a) in positions.iter().enumerate() {
        for b in &positions[i + 1..] {
            widest = widest.max(a.distance_to(b));
        }
    }
    widest
}

/// Nearest-rank percentile of an ascending slice: index `floor(n·p)`, clamped.
pub fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shots(points: &[(f64, f64)]) -> Vec<Shot> {
        points.iter().map(|&(x, y)| Shot::new(x, y, 10)).collect()
    }

    #[test]
    fn fewer_than_three_shots_give_no_analysis() {
        let analyzer = PatternAnalyzer::new();
        assert!(analyzer.analyze::<Shot>(&[]).is_none());
        assert!(analyzer.analyze(&shots(&[(0.0, 0.0), (0.1, 0.1)])).is_none());
    }

    #[test]
    fn unit_square_statistics() {
        let analysis = PatternAnalyzer::new()
            .analyze(&shots(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]))
            .expect("four shots");
        assert_eq!(analysis.mpi, NormalizedTargetPosition::new(0.5, 0.5));
        assert!((analysis.standard_deviation - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((analysis.extreme_spread - 2.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(analysis.shot_count, 4);
        assert!(analysis.directional_bias.is_significant);
        assert_eq!(analysis.directional_bias.primary_direction, Some(ClockDirection::Two));
    }

    #[test]
    fn cep_is_monotonic_and_nearest_rank() {
        let analysis = PatternAnalyzer::new()
            .analyze(&shots(&[(0.0, 0.0), (0.1, 0.0), (-0.1, 0.0), (0.0, 0.3), (0.0, -0.3)]))
            .expect("five shots");
        // Distances from the origin MPI: 0, 0.1, 0.1, 0.3, 0.3. floor(5·0.5)=2, floor(5·0.9)=4.
        assert!((analysis.cep50 - 0.1).abs() < 1e-12);
        assert!((analysis.cep90 - 0.3).abs() < 1e-12);
        assert!(analysis.cep90 >= analysis.cep50 && analysis.cep50 >= 0.0);
    }

    #[test]
    fn bias_threshold_is_strict() {
        let at_threshold = DirectionalBias::from_mpi(NormalizedTargetPosition::new(0.08, 0.0));
        assert_eq!(at_threshold.magnitude, 0.08);
        assert!(!at_threshold.is_significant);
        assert!(at_threshold.primary_direction.is_none());

        let above = DirectionalBias::from_mpi(NormalizedTargetPosition::new(0.0801, 0.0));
        assert!(above.is_significant);
        assert_eq!(above.primary_direction, Some(ClockDirection::Three));
    }

    #[test]
    fn clock_mapping() {
        assert_eq!(ClockDirection::from_angle_degrees(90.0), ClockDirection::Twelve);
        assert_eq!(ClockDirection::from_angle_degrees(0.0), ClockDirection::Three);
        assert_eq!(ClockDirection::from_angle_degrees(180.0), ClockDirection::Nine);
        assert_eq!(ClockDirection::from_angle_degrees(-90.0), ClockDirection::Six);
        assert_eq!(ClockDirection::from_angle_degrees(120.0), ClockDirection::Eleven);
        assert_eq!(ClockDirection::from_hour(12).hour(), 12);
        assert_eq!(ClockDirection::from_hour(4), ClockDirection::Four);
    }

    #[test]
    fn coaching_follows_direction() {
        let analysis = PatternAnalyzer::new()
            .analyze(&shots(&[(0.3, 0.0), (0.35, 0.05), (0.32, -0.04)]))
            .expect("three shots");
        assert_eq!(analysis.directional_bias.primary_direction, Some(ClockDirection::Three));
        assert!(analysis.coaching_text().is_some_and(|text| text.contains("thumb")));

        let centered = PatternAnalyzer::new()
            .analyze(&shots(&[(0.01, 0.0), (-0.01, 0.0), (0.0, 0.01)]))
            .expect("three shots");
        assert!(centered.coaching_text().is_none());
    }

    #[test]
    fn old_versions_need_recomputation() {
        let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).single().expect("valid date");
        let mut analysis = PatternAnalyzer::new()
            .analyze_at(&shots(&[(0.0, 0.0), (0.1, 0.0), (0.0, 0.1)]), stamp)
            .expect("three shots");
        assert_eq!(analysis.analyzed_at, stamp);
        assert!(!analysis.needs_recomputation());
        analysis.algorithm_version = ALGORITHM_VERSION - 1;
        assert!(analysis.needs_recomputation());
    }

    #[test]
    fn nearest_rank_clamps_to_last() {
        assert_eq!(nearest_rank(&[1.0, 2.0, 3.0], 1.0), 3.0);
        assert_eq!(nearest_rank(&[], 0.5), 0.0);
    }
}
