// THEORY:
// The `score_projector` answers "what would a full round look like if I kept
// shooting like this?". It models every shot as a draw from a 2D Gaussian
// centered on the group's MPI with the group's standard deviation, simulates a
// fixed number of rounds and reports the spread of round totals.
//
// Draws use the Box-Muller transform on two uniforms kept strictly inside
// (0.001, 0.999), so `ln(u1)` is always finite. The result is reproducible in
// distribution only; pass a seeded RNG for repeatable numbers.

use crate::core_modules::geometry::NormalizedTargetPosition;
use crate::core_modules::pattern_analyzer::{PatternAnalysis, nearest_rank};
use crate::core_modules::target::TargetScorer;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::f64::consts::TAU;

pub const SIMULATION_ROUNDS: usize = 1000;
const UNIFORM_LOW: f64 = 0.001;
const UNIFORM_HIGH: f64 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreProjection {
    /// Mean round total.
    pub expected_score: f64,
    /// 10th percentile.
    pub low_estimate: u32,
    /// 50th percentile.
    pub median_estimate: u32,
    /// 90th percentile.
    pub high_estimate: u32,
    pub max_possible: u32,
    pub shot_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreProjector {
    rounds: usize,
}

impl Default for ScoreProjector {
    fn default() -> Self {
        Self { rounds: SIMULATION_ROUNDS }
    }
}

impl ScoreProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rounds(rounds: usize) -> Self {
        Self { rounds: rounds.max(1) }
    }

    /// Projects a round of `shot_count` shots from a fitted group.
    pub fn project(&self, analysis: &PatternAnalysis, shot_count: usize, target: &dyn TargetScorer) -> ScoreProjection {
        self.project_with_rng(analysis, shot_count, target, &mut rand::thread_rng())
    }

    /// Deterministic projection for a given seed.
    pub fn project_seeded(
        &self,
        analysis: &PatternAnalysis,
        shot_count: usize,
        target: &dyn TargetScorer,
        seed: u64,
    ) -> ScoreProjection {
        self.project_with_rng(analysis, shot_count, target, &mut ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn project_with_rng<R: Rng + ?Sized>(
        &self,
        analysis: &PatternAnalysis,
        shot_count: usize,
        target: &dyn TargetScorer,
        rng: &mut R,
    ) -> ScoreProjection {
        self.simulate(analysis.mpi, analysis.standard_deviation, shot_count, target, rng)
    }

    /// Core simulation over an explicit MPI and standard deviation.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        mpi: NormalizedTargetPosition,
        standard_deviation: f64,
        shot_count: usize,
        target: &dyn TargetScorer,
        rng: &mut R,
    ) -> ScoreProjection {
        let sd = if standard_deviation.is_finite() { standard_deviation.max(0.0) } else { 0.0 };
        let mut totals: Vec<u32> = (0..self.rounds)
            .map(|_| {
                (0..shot_count)
                    .map(|_| target.score(&sample_shot(mpi, sd, rng)))
                    .fold(0u32, u32::saturating_add)
            })
            .collect();
        totals.sort_unstable();

        let as_f64: Vec<f64> = totals.iter().map(|&t| t as f64).collect();
        let expected_score = as_f64.iter().sum::<f64>() / as_f64.len() as f64;
        let projection = ScoreProjection {
            expected_score,
            low_estimate: nearest_rank(&as_f64, 0.1) as u32,
            median_estimate: nearest_rank(&as_f64, 0.5) as u32,
            high_estimate: nearest_rank(&as_f64, 0.9) as u32,
            max_possible: target
                .max_score()
                .saturating_mul(u32::try_from(shot_count).unwrap_or(u32::MAX)),
            shot_count,
        };
        debug!(
            "projected {} shots over {} rounds: mean {:.1}, p10 {}, p90 {}",
            shot_count, self.rounds, projection.expected_score, projection.low_estimate, projection.high_estimate
        );
        projection
    }
}

/// One Box-Muller draw around `mpi`.
fn sample_shot<R: Rng + ?Sized>(mpi: NormalizedTargetPosition, sd: f64, rng: &mut R) -> NormalizedTargetPosition {
    let u1: f64 = rng.gen_range(UNIFORM_LOW..UNIFORM_HIGH);
    let u2: f64 = rng.gen_range(UNIFORM_LOW..UNIFORM_HIGH);
    let r = (-2.0 * u1.ln()).sqrt() * sd;
    let theta = TAU * u2;
    NormalizedTargetPosition::new(mpi.x + r * theta.cos(), mpi.y + r * theta.sin())
}
