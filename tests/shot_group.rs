mod common;

use chrono::{Duration, TimeZone, Utc};
use common::init_logging;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shot_vision::core_modules::score_projector::ScoreProjector;
use shot_vision::core_modules::session_aggregator::{SessionAggregator, SessionRecord};
use shot_vision::{PatternAnalyzer, Shot, TargetScorer, TargetType};

/// Shots scattered uniformly in a square of half-width `spread` around `(cx, cy)`.
fn scattered_shots(rng: &mut ChaCha8Rng, count: usize, cx: f64, cy: f64, spread: f64, target: &TargetType) -> Vec<Shot> {
    (0..count)
        .map(|_| {
            let x = cx + rng.gen_range(-spread..spread);
            let y = cy + rng.gen_range(-spread..spread);
            let mut shot = Shot::new(x, y, 0);
            shot.score = target.score(&shot.position);
            shot
        })
        .collect()
}

#[test]
fn sessions_that_tighten_show_improving_consistency() {
    init_logging();
    let target = TargetType::AirPistol10m;
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let start = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).single().expect("valid date");
    let analyzer = PatternAnalyzer::new();

    let sessions: Vec<SessionRecord> = [0.4, 0.3, 0.2, 0.1]
        .iter()
        .enumerate()
        .map(|(week, &spread)| {
            let shots = scattered_shots(&mut rng, 30, 0.05, -0.05, spread, &target);
            SessionRecord {
                session_date: start + Duration::days(7 * week as i64),
                analysis: analyzer.analyze(&shots).expect("thirty shots"),
            }
        })
        .collect();

    let aggregate = SessionAggregator::new().aggregate(&sessions).expect("four sessions");
    assert_eq!(aggregate.total_shots, 120);
    assert_eq!(aggregate.is_consistency_improving(), Some(true));
    assert!(aggregate.pooled_standard_deviation > sessions[3].analysis.standard_deviation);
    assert!(aggregate.pooled_standard_deviation < sessions[0].analysis.standard_deviation);
}

#[test]
fn projection_brackets_the_observed_round() {
    init_logging();
    let target = TargetType::Generic;
    let mut rng = ChaCha8Rng::seed_from_u64(77);
    let shots = scattered_shots(&mut rng, 60, 0.0, 0.0, 0.25, &target);
    let analysis = PatternAnalyzer::new().analyze(&shots).expect("sixty shots");

    let projection = ScoreProjector::new().project_seeded(&analysis, 60, &target, 11);
    assert_eq!(projection.max_possible, 600);
    assert!(projection.low_estimate < projection.high_estimate);
    assert!(projection.expected_score > 300.0 && projection.expected_score < 600.0);
}
