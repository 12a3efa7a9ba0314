// THEORY:
// This file is the main entry point for the `shot_vision` library crate. It
// exposes two high-level facades and keeps the individual stages reachable for
// callers that need finer control:
//
// - `pipeline::PipelineExecutor` turns a target photo into ranked bullet-hole
//   candidates (quality gate, preprocessing, contour extraction, filtering and
//   confidence scoring, with a shared stage cache).
// - `analysis::ShotGroupReport` turns confirmed shots into validation results,
//   group statistics and a projected round score.
//
// Contour extraction is a pluggable boundary (`ContourExtractor`); the crate
// ships a threshold-and-trace implementation used by the example runner.

pub mod analysis;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use analysis::ShotGroupReport;
pub use config::{DiameterRange, HoleDetectionConfig, ScoringOverrides};
pub use core_modules::contour::{ContourExtractor, NormalizedContour, ThresholdContourExtractor};
pub use core_modules::geometry::{CropGeometry, NormalizedTargetPosition, PixelPoint};
pub use core_modules::pattern_analyzer::{PatternAnalysis, PatternAnalyzer, Shot, ShotRecord};
pub use core_modules::target::{TargetScorer, TargetType};
pub use error::{ContourError, VisionError, VisionResult};
pub use pipeline::{DetectionReport, ExecuteOptions, PipelineExecutor};
