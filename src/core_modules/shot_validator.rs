// THEORY:
// Validation sits between detection and storage. It never fails: every check
// appends either a warning (worth showing to the user, not blocking) or an
// error (the record must not be persisted) to a `ValidationResult`.
//
// `ShotValidator` checks individual shots and shot groups:
// - coordinates must be finite and within ±2 target radii; beyond the outer
//   ring is suspicious, well beyond it is rejected;
// - the recorded score is compared against the score the position implies,
//   with a small tolerance for ring-line ambiguity;
// - the score must exist on the target;
// - near-identical positions, unusual spacing and lone outliers are flagged.
//
// `ScanValidator` checks a whole scanned target: image size, crop perspective,
// candidate confidence, shot count and the recorded total.

use crate::core_modules::confidence::DetectedHoleCandidate;
use crate::core_modules::geometry::{CropGeometry, NormalizedTargetPosition};
use crate::core_modules::pattern_analyzer::{ShotRecord, centroid};
use crate::core_modules::target::TargetScorer;
use log::warn;
use serde::Serialize;

pub const MAX_COORDINATE: f64 = 2.0;
pub const OUTER_RING_WARNING: f64 = 1.0;
pub const OUTER_RING_ERROR: f64 = 1.5;
/// Score difference tolerated before a mismatch becomes an error.
pub const SCORE_TOLERANCE: u32 = 2;
pub const DUPLICATE_DISTANCE: f64 = 0.02;
pub const TOO_CLUSTERED_AVERAGE: f64 = 0.03;
pub const TOO_SPREAD_AVERAGE: f64 = 1.2;
pub const OUTLIER_FACTOR: f64 = 3.0;

pub const MIN_IMAGE_DIMENSION: u32 = 200;
pub const LOW_CONFIDENCE: f64 = 0.5;
pub const MAX_SHOTS_PER_SCAN: usize = 120;
pub const MIN_AXIS_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    /// Same issues, each prefixed with `label: `.
    pub fn labelled(self, label: &str) -> ValidationResult {
        ValidationResult {
            warnings: self.warnings.into_iter().map(|w| format!("{label}: {w}")).collect(),
            errors: self.errors.into_iter().map(|e| format!("{label}: {e}")).collect(),
        }
    }

    /// All issues as one human-readable paragraph, errors first.
    pub fn summary(&self) -> Option<String> {
        if self.errors.is_empty() && self.warnings.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("Error: {e}."))
            .chain(self.warnings.iter().map(|w| format!("Warning: {w}.")))
            .collect();
        Some(lines.join(" "))
    }
}

pub struct ShotValidator<'a> {
    target: &'a dyn TargetScorer,
}

impl<'a> ShotValidator<'a> {
    pub fn new(target: &'a dyn TargetScorer) -> Self {
        Self { target }
    }

    pub fn validate_position(&self, position: &NormalizedTargetPosition) -> ValidationResult {
        let mut result = ValidationResult::default();
        if !position.is_finite() {
            result.error("position is not a finite number");
            return result;
        }
        if position.x.abs() > MAX_COORDINATE || position.y.abs() > MAX_COORDINATE {
            result.error(format!(
                "position ({:.3}, {:.3}) is outside the ±{MAX_COORDINATE} coordinate range",
                position.x, position.y
            ));
            return result;
        }
        let r = position.radial_distance();
        if r > OUTER_RING_ERROR {
            result.error(format!("position is {r:.2} radii from center, far outside the target"));
        } else if r > OUTER_RING_WARNING {
            result.warn(format!("position is {r:.2} radii from center, outside the scoring area"));
        }
        result
    }

    pub fn validate_shot<S: ShotRecord + ?Sized>(&self, shot: &S) -> ValidationResult {
        let position = shot.position();
        let mut result = self.validate_position(&position);
        let recorded = shot.score();
        if !self.target.is_valid_score(recorded) {
            result.error(format!("score {recorded} is not possible on this target (max {})", self.target.max_score()));
        }
        if position.is_finite() {
            let implied = self.target.score(&position);
            let difference = recorded.abs_diff(implied);
            if difference > SCORE_TOLERANCE {
                result.error(format!("recorded score {recorded} does not match position score {implied}"));
            } else if difference > 0 {
                result.warn(format!("recorded score {recorded} differs from position score {implied}"));
            }
        }
        result
    }

    pub fn validate_group<S: ShotRecord>(&self, shots: &[S]) -> ValidationResult {
        let mut result = ValidationResult::default();
        for (index, shot) in shots.iter().enumerate() {
            result.merge(self.validate_shot(shot).labelled(&format!("shot {}", index + 1)));
        }
        let positions: Vec<NormalizedTargetPosition> = shots
            .iter()
            .map(|shot| shot.position())
            .filter(NormalizedTargetPosition::is_finite)
            .collect();
        result.merge(duplicates(&positions));
        result.merge(spacing(&positions));
        if !result.is_valid() {
            warn!("shot group failed validation with {} errors", result.errors.len());
        }
        result
    }
}

/// Pairs closer than the duplicate distance. Flagged only: tight groups happen.
fn duplicates(positions: &[NormalizedTargetPosition]) -> ValidationResult {
    let mut result = ValidationResult::default();
    for (i, a) in positions.iter().enumerate() {
        for (j, b) in positions.iter().enumerate().skip(i + 1) {
            if a.distance_to(b) < DUPLICATE_DISTANCE {
                result.warn(format!("shots {} and {} may be the same hole", i + 1, j + 1));
            }
        }
    }
    result
}

fn spacing(positions: &[NormalizedTargetPosition]) -> ValidationResult {
    let mut result = ValidationResult::default();
    if positions.len() < 2 {
        return result;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in positions.iter().enumerate() {
        for b in &positions[i + 1..] {
            total += a.distance_to(b);
            pairs += 1;
        }
    }
    let average = total / pairs as f64;
    if average < TOO_CLUSTERED_AVERAGE {
        result.warn(format!("shots are unusually clustered (average spacing {average:.3})"));
    } else if average > TOO_SPREAD_AVERAGE {
        result.warn(format!("shots are unusually spread (average spacing {average:.3})"));
    }

    if positions.len() >= 3 {
        let center = centroid(positions);
        let distances: Vec<f64> = positions.iter().map(|p| p.distance_to(&center)).collect();
        let mean = distances.iter().sum::<f64>() / distances.len() as f64;
        if mean > 0.0 {
            for (index, distance) in distances.iter().enumerate() {
                if *distance > OUTLIER_FACTOR * mean {
                    result.warn(format!("shot {} is far from the rest of the group", index + 1));
                }
            }
        }
    }
    result
}

/// A scanned target as submitted for storage.
#[derive(Debug, Clone, Copy)]
pub struct ScanSubmission<'a, S> {
    pub image_width: u32,
    pub image_height: u32,
    pub crop: &'a CropGeometry,
    pub candidates: &'a [DetectedHoleCandidate],
    pub shots: &'a [S],
    /// Total entered by the shooter, if any.
    pub recorded_total: Option<u32>,
}

pub struct ScanValidator<'a> {
    shots: ShotValidator<'a>,
}

impl<'a> ScanValidator<'a> {
    pub fn new(target: &'a dyn TargetScorer) -> Self {
        Self { shots: ShotValidator::new(target) }
    }

    pub fn validate_image_size(&self, width: u32, height: u32) -> ValidationResult {
        let mut result = ValidationResult::default();
        if width < MIN_IMAGE_DIMENSION || height < MIN_IMAGE_DIMENSION {
            result.error(format!(
                "image is {width}x{height}, at least {MIN_IMAGE_DIMENSION}x{MIN_IMAGE_DIMENSION} is required"
            ));
        }
        result
    }

    pub fn validate_crop(&self, crop: &CropGeometry) -> ValidationResult {
        let mut result = ValidationResult::default();
        let ratio = crop.axis_ratio();
        if ratio < MIN_AXIS_RATIO {
            result.warn(format!(
                "target appears distorted (axis ratio {ratio:.2}); photograph it straight on"
            ));
        }
        result
    }

    pub fn validate_candidates(&self, candidates: &[DetectedHoleCandidate]) -> ValidationResult {
        let mut result = ValidationResult::default();
        let low = candidates.iter().filter(|c| c.confidence < LOW_CONFIDENCE).count();
        if low > 0 {
            result.warn(format!("{low} detected holes have low confidence; please review them"));
        }
        result
    }

    pub fn validate_shot_count(&self, count: usize) -> ValidationResult {
        let mut result = ValidationResult::default();
        if count > MAX_SHOTS_PER_SCAN {
            result.error(format!("{count} shots exceed the {MAX_SHOTS_PER_SCAN} shot limit for one target"));
        }
        result
    }

    pub fn validate_total<S: ShotRecord>(&self, recorded_total: u32, shots: &[S]) -> ValidationResult {
        let mut result = ValidationResult::default();
        // Widened so out-of-range scores cannot overflow the sum.
        let computed: u64 = shots.iter().map(|shot| u64::from(shot.score())).sum();
        if computed != u64::from(recorded_total) {
            result.error(format!("recorded total {recorded_total} does not equal the sum of shot scores {computed}"));
        }
        result
    }

    pub fn validate_scan<S: ShotRecord>(&self, scan: &ScanSubmission<'_, S>) -> ValidationResult {
        let mut result = self.validate_image_size(scan.image_width, scan.image_height);
        result.merge(self.validate_crop(scan.crop));
        result.merge(self.validate_candidates(scan.candidates));
        result.merge(self.validate_shot_count(scan.shots.len()));
        if let Some(total) = scan.recorded_total {
            result.merge(self.validate_total(total, scan.shots));
        }
        result.merge(self.shots.validate_group(scan.shots));
        result
    }
}
