// THEORY:
// The `session_aggregator` combines several analyzed sessions into one view of a
// shooter's form. Sessions are weighted by how many shots they hold, so a
// ten-shot warm-up does not count as much as a sixty-shot match:
//
// - the combined MPI is the shot-count weighted centroid of the session MPIs;
// - the pooled standard deviation is `sqrt(Σ nᵢ·sdᵢ² / Σ nᵢ)`.
//
// Trends are ordinary least-squares slopes against the session date, in units
// per day. A negative consistency trend means groups are tightening; a
// negative accuracy trend means the MPI is moving toward the center.

use crate::core_modules::geometry::NormalizedTargetPosition;
use crate::core_modules::pattern_analyzer::{DirectionalBias, PatternAnalysis};
use chrono::{DateTime, Utc};
use serde::Serialize;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One analyzed session and when it was shot.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_date: DateTime<Utc>,
    pub analysis: PatternAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateAnalysis {
    pub session_count: usize,
    pub total_shots: usize,
    pub weighted_mpi: NormalizedTargetPosition,
    pub pooled_standard_deviation: f64,
    pub directional_bias: DirectionalBias,
    /// Slope of standard deviation per day. None with fewer than two distinct dates.
    pub consistency_trend: Option<f64>,
    /// Slope of MPI radial distance per day.
    pub accuracy_trend: Option<f64>,
}

impl AggregateAnalysis {
    pub fn is_consistency_improving(&self) -> Option<bool> {
        self.consistency_trend.map(|slope| slope < 0.0)
    }

    pub fn is_accuracy_improving(&self) -> Option<bool> {
        self.accuracy_trend.map(|slope| slope < 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionAggregator;

impl SessionAggregator {
    pub fn new() -> Self {
        Self
    }

    /// None when there are no sessions or they hold no shots.
    pub fn aggregate(&self, sessions: &[SessionRecord]) -> Option<AggregateAnalysis> {
        let total_shots: usize = sessions.iter().map(|s| s.analysis.shot_count).sum();
        if total_shots == 0 {
            return None;
        }
        let total = total_shots as f64;

        let (sx, sy, variance) = sessions.iter().fold((0.0, 0.0, 0.0), |(sx, sy, var), s| {
            let n = s.analysis.shot_count as f64;
            let sd = s.analysis.standard_deviation;
            (sx + n * s.analysis.mpi.x, sy + n * s.analysis.mpi.y, var + n * sd * sd)
        });
        let weighted_mpi = NormalizedTargetPosition::new(sx / total, sy / total);

        let mut ordered: Vec<&SessionRecord> = sessions.iter().collect();
        ordered.sort_by_key(|s| s.session_date);
        let first_date = ordered[0].session_date;
        let days: Vec<f64> = ordered
            .iter()
            .map(|s| (s.session_date - first_date).num_seconds() as f64 / SECONDS_PER_DAY)
            .collect();
        let spreads: Vec<f64> = ordered.iter().map(|s| s.analysis.standard_deviation).collect();
        let offsets: Vec<f64> = ordered.iter().map(|s| s.analysis.mpi.radial_distance()).collect();

        Some(AggregateAnalysis {
            session_count: sessions.len(),
            total_shots,
            weighted_mpi,
            pooled_standard_deviation: (variance / total).sqrt(),
            directional_bias: DirectionalBias::from_mpi(weighted_mpi),
            consistency_trend: regression_slope(&days, &spreads),
            accuracy_trend: regression_slope(&days, &offsets),
        })
    }
}

/// Least-squares slope of `ys` over `xs`. None when the xs do not vary.
pub fn regression_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let (covariance, spread) = xs[..n]
        .iter()
        .zip(&ys[..n])
        .fold((0.0, 0.0), |(cov, spread), (x, y)| {
            (cov + (x - mean_x) * (y - mean_y), spread + (x - mean_x).powi(2))
        });
    if spread <= f64::EPSILON {
        return None;
    }
    Some(covariance / spread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pattern_analyzer::ALGORITHM_VERSION;
    use chrono::{Duration, TimeZone};

    fn session(day: i64, shots: usize, mpi: (f64, f64), sd: f64) -> SessionRecord {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).single().expect("valid date");
        let mpi = NormalizedTargetPosition::new(mpi.0, mpi.1);
        SessionRecord {
            session_date: start + Duration::days(day),
            analysis: PatternAnalysis {
                mpi,
                standard_deviation: sd,
                extreme_spread: 3.0 * sd,
                cep50: sd,
                cep90: 2.0 * sd,
                directional_bias: DirectionalBias::from_mpi(mpi),
                shot_count: shots,
                algorithm_version: ALGORITHM_VERSION,
                analyzed_at: start,
            },
        }
    }

    #[test]
    fn weights_follow_shot_counts() {
        let aggregate = SessionAggregator::new()
            .aggregate(&[session(0, 10, (0.0, 0.0), 0.1), session(1, 30, (0.4, -0.2), 0.3)])
            .expect("two sessions");
        assert_eq!(aggregate.total_shots, 40);
        assert!((aggregate.weighted_mpi.x - 0.3).abs() < 1e-12);
        assert!((aggregate.weighted_mpi.y + 0.15).abs() < 1e-12);
        let pooled = ((10.0 * 0.01 + 30.0 * 0.09) / 40.0f64).sqrt();
        assert!((aggregate.pooled_standard_deviation - pooled).abs() < 1e-12);
        assert!(aggregate.directional_bias.is_significant);
    }

    #[test]
    fn tightening_groups_show_negative_trend() {
        // Listed out of order on purpose.
        let sessions = [
            session(2, 10, (0.05, 0.0), 0.1),
            session(0, 10, (0.25, 0.0), 0.3),
            session(1, 10, (0.15, 0.0), 0.2),
        ];
        let aggregate = SessionAggregator::new().aggregate(&sessions).expect("sessions");
        assert!((aggregate.consistency_trend.expect("three dates") + 0.1).abs() < 1e-9);
        assert!((aggregate.accuracy_trend.expect("three dates") + 0.1).abs() < 1e-9);
        assert_eq!(aggregate.is_consistency_improving(), Some(true));
        assert_eq!(aggregate.is_accuracy_improving(), Some(true));
    }

    #[test]
    fn single_session_has_no_trend() {
        let aggregate = SessionAggregator::new().aggregate(&[session(0, 5, (0.0, 0.0), 0.1)]).expect("one session");
        assert!(aggregate.consistency_trend.is_none());
        assert!(aggregate.is_accuracy_improving().is_none());
    }

    #[test]
    fn empty_input_has_no_aggregate() {
        assert!(SessionAggregator::new().aggregate(&[]).is_none());
    }
}
