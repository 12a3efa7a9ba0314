// THEORY:
// The `analysis` module is the shot-group counterpart of `pipeline`: one call
// that takes the shots the user confirmed and produces everything the
// application stores or displays about them.
//
//   Validate -> Analyze -> Project
//
// Shots whose own validation has errors are left out of the statistics, so a
// single mis-clicked shot cannot drag the MPI off the target. Their errors are
// still reported.

use crate::core_modules::pattern_analyzer::{PatternAnalysis, PatternAnalyzer, ShotRecord};
use crate::core_modules::score_projector::{ScoreProjection, ScoreProjector};
use crate::core_modules::shot_validator::{ShotValidator, ValidationResult};
use crate::core_modules::target::TargetScorer;
use log::info;
use rand::Rng;
use serde::Serialize;

pub use crate::core_modules::pattern_analyzer::{ClockDirection, DirectionalBias, Shot};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotGroupReport {
    pub validation: ValidationResult,
    /// Shots that entered the statistics.
    pub analyzed_shots: usize,
    /// Shots left out because their validation failed.
    pub skipped_shots: usize,
    /// Absent with fewer than three usable shots.
    pub pattern: Option<PatternAnalysis>,
    pub projection: Option<ScoreProjection>,
}

impl ShotGroupReport {
    /// Builds the report, projecting a round of `projected_round` shots when given.
    pub fn build<S: ShotRecord>(shots: &[S], target: &dyn TargetScorer, projected_round: Option<usize>) -> Self {
        Self::build_with_rng(shots, target, projected_round, &mut rand::thread_rng())
    }

    pub fn build_with_rng<S: ShotRecord, R: Rng + ?Sized>(
        shots: &[S],
        target: &dyn TargetScorer,
        projected_round: Option<usize>,
        rng: &mut R,
    ) -> Self {
        let validator = ShotValidator::new(target);
        let validation = validator.validate_group(shots);
        let usable: Vec<&S> = shots.iter().filter(|shot| validator.validate_shot(*shot).is_valid()).collect();

        let pattern = PatternAnalyzer::new().analyze(&usable);
        let projection = match (&pattern, projected_round) {
            (Some(analysis), Some(round)) => Some(ScoreProjector::new().project_with_rng(analysis, round, target, rng)),
            _ => None,
        };
        info!(
            "shot group: {} analyzed, {} skipped, {} warnings, {} errors",
            usable.len(),
            shots.len() - usable.len(),
            validation.warnings.len(),
            validation.errors.len()
        );
        Self {
            analyzed_shots: usable.len(),
            skipped_shots: shots.len() - usable.len(),
            validation,
            pattern,
            projection,
        }
    }

    pub fn coaching_text(&self) -> Option<&'static str> {
        self.pattern.as_ref().and_then(PatternAnalysis::coaching_text)
    }
}
