// Detection stages, in pipeline order, followed by the shot-group statistics.

pub mod grayscale;
pub mod geometry;
pub mod target;
pub mod quality;
pub mod local_background;
pub mod preprocess;
pub mod contour;
pub mod candidate_filter;
pub mod confidence;
pub mod stage_cache;

pub mod pattern_analyzer;
pub mod session_aggregator;
pub mod score_projector;
pub mod shot_validator;
