// Example runner: detect bullet holes in one target photo and summarize the group.

use clap::{Parser, ValueEnum};
use log::{info, warn};
use shot_vision::core_modules::shot_validator::{ScanSubmission, ScanValidator};
use shot_vision::{
    CropGeometry, ExecuteOptions, HoleDetectionConfig, PipelineExecutor, ShotGroupReport, TargetType,
    ThresholdContourExtractor,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TargetArg {
    Pistol,
    Rifle,
    Generic,
}

impl From<TargetArg> for TargetType {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Pistol => TargetType::AirPistol10m,
            TargetArg::Rifle => TargetType::AirRifle10m,
            TargetArg::Generic => TargetType::Generic,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "shot_vision", about = "Detect bullet holes in a target photo", version)]
struct Cli {
    /// Target photo; the target is assumed to fill the frame
    image: PathBuf,

    /// Target family printed on the paper
    #[arg(short = 't', long = "target", value_enum, default_value = "generic")]
    target: TargetArg,

    /// JSON file with a HoleDetectionConfig preset
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Give up on contour extraction after this many milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Print candidates as JSON instead of a table
    #[arg(long = "json")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HoleDetectionConfig::from_json_str(&tokio::fs::read_to_string(path).await?)?,
        None => HoleDetectionConfig::default(),
    };
    let target = TargetType::from(cli.target);
    let image = PipelineExecutor::load_image(&cli.image).await?;
    let crop = CropGeometry::full_frame(image.width(), image.height());

    let executor = PipelineExecutor::new(Arc::new(ThresholdContourExtractor::default()));
    let options = ExecuteOptions {
        contour_timeout: cli.timeout_ms.map(Duration::from_millis),
        ..Default::default()
    };
    let report = executor.execute(&image, &crop, &target, &config, options).await?;

    println!(
        "Quality: {:?} (sharpness {:.2}, contrast {:.2}, brightness {:.2}, noise {:.2})",
        report.quality.quality_level(),
        report.quality.sharpness,
        report.quality.contrast,
        report.quality.brightness,
        report.quality.noise_level
    );
    if let Some(guidance) = report.quality.guidance_text() {
        println!("  {guidance}");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report.candidates)?);
    } else {
        println!("{} candidates on a {} target ({:?}):", report.candidates.len(), target.name(), report.timing.total);
        for (rank, candidate) in report.candidates.iter().enumerate() {
            println!(
                "  #{:<2} ({:>7.1}, {:>7.1})  score {:>2}  confidence {:.2}",
                rank + 1,
                candidate.pixel_position.x,
                candidate.pixel_position.y,
                candidate.score,
                candidate.confidence
            );
        }
        for rejected in &report.rejected {
            if let Some(reason) = &rejected.rejection {
                info!("rejected contour at {:?}: {}", rejected.contour.center_pixel, reason.describe());
            }
        }
    }

    let scan = ScanValidator::new(&target).validate_scan(&ScanSubmission {
        image_width: image.width(),
        image_height: image.height(),
        crop: &crop,
        candidates: &report.candidates,
        shots: &report.candidates,
        recorded_total: None,
    });
    if let Some(summary) = scan.summary() {
        warn!("{summary}");
    }

    let group = ShotGroupReport::build(&report.candidates, &target, Some(report.candidates.len()));
    if let Some(pattern) = &group.pattern {
        println!(
            "Group: MPI ({:.3}, {:.3}), SD {:.3}, extreme spread {:.3}, CEP50 {:.3}",
            pattern.mpi.x, pattern.mpi.y, pattern.standard_deviation, pattern.extreme_spread, pattern.cep50
        );
        if let Some(tip) = group.coaching_text() {
            println!("  {tip}");
        }
    }
    if let Some(projection) = &group.projection {
        println!(
            "Projected round: {:.1} expected ({}..{} of {})",
            projection.expected_score, projection.low_estimate, projection.high_estimate, projection.max_possible
        );
    }
    executor.cache().shutdown().await;
    Ok(())
}
