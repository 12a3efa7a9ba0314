// THEORY:
// The `pipeline` module is the top-level API of the detection engine. It turns a
// photo of a target into a ranked list of bullet-hole candidates by running a
// fixed, linear sequence of stages:
//
//   Quality -> Preprocess -> Contour -> Filter -> Score
//
// - Quality is always recomputed. It is cheap and its output is a gate, not an
//   input to later stages.
// - Preprocess and Contour depend only on the image bytes and are cached by
//   image hash.
// - Filter depends on the image, the detection configuration, the crop and the
//   target rings; it is cached by `<imageHash>_<configHash>` where the config
//   hash covers all of those.
// - Score is never cached; it reads per-invocation overrides.
//
// Failure semantics: quality problems degrade to a neutral assessment, contour
// extraction failures abort the invocation. Extraction is the one step with
// unbounded latency, so it runs under the caller's timeout and abort handle.
// Cache writes are deferred until extraction succeeds, so a timed-out or
// cancelled invocation leaves the cache exactly as it found it.

use crate::config::{HoleDetectionConfig, ScoringOverrides};
use crate::core_modules::candidate_filter::{self, FilteredCandidate};
use crate::core_modules::confidence::ConfidenceScorer;
use crate::core_modules::contour::{self, ContourExtractor, NormalizedContour};
use crate::core_modules::geometry::CropGeometry;
use crate::core_modules::grayscale::grayscale::{GrayscaleBuffer, image_content_hash};
use crate::core_modules::preprocess::PreprocessingResult;
use crate::core_modules::quality::QualityAssessor;
use crate::core_modules::stage_cache::{StageCache, filtering_key};
use crate::core_modules::target::TargetScorer;
use crate::error::{VisionError, VisionResult};
use futures::StreamExt;
use futures::future::{AbortRegistration, Abortable};
use image::DynamicImage;
use log::{debug, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Re-export key data structures for the public API.
pub use crate::core_modules::candidate_filter::RejectionReason;
pub use crate::core_modules::confidence::{CandidateFeatures, DetectedHoleCandidate};
pub use crate::core_modules::quality::{Exposure, QualityAssessment, QualityLevel};
pub use crate::core_modules::stage_cache::CacheStatistics;

/// Per-invocation controls.
#[derive(Debug, Default)]
pub struct ExecuteOptions {
    /// Upper bound on the contour-extraction call.
    pub contour_timeout: Option<Duration>,
    /// Abandons the invocation when the paired `AbortHandle` fires.
    pub abort: Option<AbortRegistration>,
    /// Overrides for the scoring stage, scoped to this call.
    pub overrides: ScoringOverrides,
    /// Skip detection when the quality gate rejects the photo.
    pub enforce_quality_gate: bool,
}

/// Wall-clock time spent in each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub quality: Duration,
    pub preprocess: Duration,
    pub contour: Duration,
    pub filter: Duration,
    pub score: Duration,
    pub total: Duration,
}

/// Which cacheable stages were served from the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageHits {
    pub preprocess: bool,
    pub contour: bool,
    pub filter: bool,
}

/// Everything one invocation produced.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub image_hash: String,
    /// Ranked by confidence, highest first.
    pub candidates: Vec<DetectedHoleCandidate>,
    /// Filter rejections, for diagnostics.
    pub rejected: Vec<FilteredCandidate>,
    pub quality: QualityAssessment,
    /// False when the quality gate was enforced and rejected the photo.
    pub detection_ran: bool,
    pub timing: StageTimings,
    pub stage_hits: StageHits,
    pub cache_stats: CacheStatistics,
}

/// One image of a batch together with where its target sits.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub image: DynamicImage,
    pub crop: CropGeometry,
}

/// The staged hole-detection engine.
#[derive(Clone)]
pub struct PipelineExecutor {
    cache: StageCache,
    extractor: Arc<dyn ContourExtractor>,
    assessor: QualityAssessor,
}

impl PipelineExecutor {
    /// Creates an executor with its own cache. Must be called inside a tokio runtime.
    pub fn new(extractor: Arc<dyn ContourExtractor>) -> Self {
        Self::with_cache(StageCache::new(), extractor)
    }

    /// Creates an executor sharing an existing cache.
    pub fn with_cache(cache: StageCache, extractor: Arc<dyn ContourExtractor>) -> Self {
        Self {
            cache,
            extractor,
            assessor: QualityAssessor::new(),
        }
    }

    pub fn cache(&self) -> &StageCache {
        &self.cache
    }

    /// Decodes an image file on the blocking pool.
    pub async fn load_image(path: impl Into<PathBuf>) -> VisionResult<DynamicImage> {
        let path = path.into();
        let image = tokio::task::spawn_blocking(move || image::open(path))
            .await
            .map_err(|err| VisionError::Io(std::io::Error::other(err)))??;
        Ok(image)
    }

    /// Decodes an image file and runs the pipeline on it.
    pub async fn execute_path(
        &self,
        path: impl Into<PathBuf>,
        crop: &CropGeometry,
        target: &dyn TargetScorer,
        config: &HoleDetectionConfig,
        options: ExecuteOptions,
    ) -> VisionResult<DetectionReport> {
        let image = Self::load_image(path).await?;
        self.execute(&image, crop, target, config, options).await
    }

    pub async fn execute(
        &self,
        image: &DynamicImage,
        crop: &CropGeometry,
        target: &dyn TargetScorer,
        config: &HoleDetectionConfig,
        options: ExecuteOptions,
    ) -> VisionResult<DetectionReport> {
        config.validate()?;
        if image.width() == 0 || image.height() == 0 {
            return Err(VisionError::EmptyImage {
                width: image.width(),
                height: image.height(),
            });
        }
        let started = Instant::now();
        let mut timing = StageTimings::default();
        let mut stage_hits = StageHits::default();
        let image_hash = image_content_hash(image);

        // --- 1. Quality ---
        let stage = Instant::now();
        let grayscale = Arc::new(GrayscaleBuffer::from_image(image));
        let quality = self.assessor.assess(grayscale.clone()).await;
        timing.quality = stage.elapsed();

        if options.enforce_quality_gate && !quality.is_acceptable_for_detection() {
            info!("quality gate rejected image {}: {:?}", short(&image_hash), quality.guidance());
            timing.total = started.elapsed();
            return Ok(DetectionReport {
                image_hash,
                candidates: Vec::new(),
                rejected: Vec::new(),
                quality,
                detection_ran: false,
                timing,
                stage_hits,
                cache_stats: self.cache.statistics().await?,
            });
        }

        // --- 2. Preprocess ---
        let stage = Instant::now();
        let cached_pre = self.cache.get_preprocessing(&image_hash).await?;
        stage_hits.preprocess = cached_pre.is_some();
        let preprocessed = match cached_pre {
            Some(result) => result,
            None => Arc::new(PreprocessingResult::from_shared(grayscale)),
        };
        timing.preprocess = stage.elapsed();
        debug!("preprocess {} (cache hit: {})", short(&image_hash), stage_hits.preprocess);

        // --- 3. Contour ---
        let stage = Instant::now();
        let cached_contours = self.cache.get_contours(&image_hash).await?;
        stage_hits.contour = cached_contours.is_some();
        // The cached entry is independent of the configuration; the point cut is applied per run.
        let measured = match cached_contours {
            Some(result) => result,
            None => {
                let raw = self
                    .run_extraction(preprocessed.grayscale.clone(), options.contour_timeout, options.abort)
                    .await?;
                let gray = &preprocessed.grayscale;
                Arc::new(contour::to_pixel_contours(raw, gray.width, gray.height, contour::MIN_CLOSED_POINTS))
            }
        };
        let contours = measured.with_min_points(config.min_contour_points);
        timing.contour = stage.elapsed();
        debug!(
            "contours {}: {} kept, {} discarded (cache hit: {})",
            short(&image_hash),
            contours.contours.len(),
            contours.discarded_count,
            stage_hits.contour
        );

        // Extraction succeeded: the deferred writes are now safe.
        if !stage_hits.preprocess {
            self.cache.cache_preprocessing(preprocessed.clone(), &image_hash).await?;
        }
        if !stage_hits.contour {
            self.cache.cache_contours(measured.clone(), &image_hash).await?;
        }

        // --- 4. Filter ---
        let stage = Instant::now();
        let filter_key = filtering_key(&image_hash, &filter_config_hash(config, crop, target));
        let cached_filter = self.cache.get_filtering(&filter_key).await?;
        stage_hits.filter = cached_filter.is_some();
        let filtered = match cached_filter {
            Some(result) => result,
            None => {
                let result = Arc::new(candidate_filter::filter_candidates(&contours.contours, crop, target, config));
                self.cache.cache_filtering(result.clone(), &filter_key).await?;
                result
            }
        };
        timing.filter = stage.elapsed();
        debug!(
            "filter {}: {} accepted, {} rejected (cache hit: {})",
            short(&image_hash),
            filtered.accepted.len(),
            filtered.rejected.len(),
            stage_hits.filter
        );

        // --- 5. Score ---
        let stage = Instant::now();
        let scorer = ConfidenceScorer {
            grayscale: &preprocessed.grayscale,
            edge_map: preprocessed.edge_map.as_deref(),
            target,
            config,
            overrides: &options.overrides,
        };
        let candidates = scorer.score_all(&filtered.accepted);
        timing.score = stage.elapsed();
        timing.total = started.elapsed();

        let cache_stats = self.cache.statistics().await?;
        info!(
            "detected {} candidates in {} ({:?}, cache hit rate {:.2})",
            candidates.len(),
            short(&image_hash),
            timing.total,
            cache_stats.hit_rate()
        );

        Ok(DetectionReport {
            image_hash,
            candidates,
            rejected: filtered.rejected.clone(),
            quality,
            detection_ran: true,
            timing,
            stage_hits,
            cache_stats,
        })
    }

    /// Runs many images through the shared cache, at most one per CPU at a
    /// time. Results come back in input order.
    pub async fn execute_batch(
        &self,
        items: &[BatchItem],
        target: &dyn TargetScorer,
        config: &HoleDetectionConfig,
        overrides: &ScoringOverrides,
        contour_timeout: Option<Duration>,
    ) -> Vec<VisionResult<DetectionReport>> {
        let concurrency = num_cpus::get().max(1);
        let mut indexed: Vec<(usize, VisionResult<DetectionReport>)> = futures::stream::iter(items.iter().enumerate())
            .map(|(index, item)| async move {
                let options = ExecuteOptions {
                    contour_timeout,
                    overrides: overrides.clone(),
                    ..Default::default()
                };
                (index, self.execute(&item.image, &item.crop, target, config, options).await)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    async fn run_extraction(
        &self,
        grayscale: Arc<GrayscaleBuffer>,
        timeout: Option<Duration>,
        abort: Option<AbortRegistration>,
    ) -> VisionResult<Vec<NormalizedContour>> {
        let extraction = self.extractor.extract(grayscale);
        let guarded = async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, extraction).await {
                    Ok(result) => result.map_err(VisionError::from),
                    Err(_) => Err(VisionError::ContourTimeout(limit)),
                },
                None => extraction.await.map_err(VisionError::from),
            }
        };
        match abort {
            Some(registration) => Abortable::new(guarded, registration)
                .await
                .map_err(|_| VisionError::Cancelled)?,
            None => guarded.await,
        }
    }
}

/// Hash of everything the filtering stage reads besides the contours.
fn filter_config_hash(config: &HoleDetectionConfig, crop: &CropGeometry, target: &dyn TargetScorer) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config.content_hash().as_bytes());
    for value in [crop.center.x, crop.center.y, crop.radius_x, crop.radius_y] {
        hasher.update(value.to_le_bytes());
    }
    for radius in target.ring_radii() {
        hasher.update(radius.to_le_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::contour::ThresholdContourExtractor;
    use crate::core_modules::geometry::PixelPoint;
    use crate::core_modules::target::TargetType;
    use crate::error::ContourError;
    use futures::FutureExt;
    use futures::future::{AbortHandle, BoxFuture};
    use image::{Luma, GrayImage};
    use tempfile::TempDir;

    fn target_photo() -> DynamicImage {
        let mut img = GrayImage::from_pixel(120, 120, Luma([225u8]));
        for y in 0..120u32 {
            for x in 0..120u32 {
                let d = ((x as f64 - 70.0).powi(2) + (y as f64 - 50.0).powi(2)).sqrt();
                if d <= 6.0 {
                    img.put_pixel(x, y, Luma([20]));
                }
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    fn crop() -> CropGeometry {
        CropGeometry::new(PixelPoint::new(60.0, 60.0), 60.0, 60.0)
    }

    struct FailingExtractor;

    impl ContourExtractor for FailingExtractor {
        fn extract(&self, _image: Arc<GrayscaleBuffer>) -> BoxFuture<'static, Result<Vec<NormalizedContour>, ContourError>> {
            async { Err(ContourError::Failed("vision service offline".into())) }.boxed()
        }
    }

    struct StalledExtractor;

    impl ContourExtractor for StalledExtractor {
        fn extract(&self, _image: Arc<GrayscaleBuffer>) -> BoxFuture<'static, Result<Vec<NormalizedContour>, ContourError>> {
            futures::future::pending().boxed()
        }
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let executor = PipelineExecutor::new(Arc::new(ThresholdContourExtractor::default()));
        let image = target_photo();
        let config = HoleDetectionConfig::default();

        let first = executor
            .execute(&image, &crop(), &TargetType::Generic, &config, ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert_eq!(first.stage_hits, StageHits::default());
        assert_eq!(first.candidates.len(), 1);

        let second = executor
            .execute(&image, &crop(), &TargetType::Generic, &config, ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert_eq!(second.stage_hits, StageHits { preprocess: true, contour: true, filter: true });
        assert_eq!(second.candidates, first.candidates);
    }

    #[tokio::test]
    async fn config_change_reuses_contours_but_refilters() {
        let executor = PipelineExecutor::new(Arc::new(ThresholdContourExtractor::default()));
        let image = target_photo();
        executor
            .execute(&image, &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), ExecuteOptions::default())
            .await
            .expect("pipeline runs");

        let strict = HoleDetectionConfig { min_circularity: 0.99, ..Default::default() };
        let report = executor
            .execute(&image, &crop(), &TargetType::Generic, &strict, ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert!(report.stage_hits.contour);
        assert!(!report.stage_hits.filter);
        assert!(report.candidates.is_empty());
        assert!(matches!(report.rejected[0].rejection, Some(RejectionReason::LowCircularity { .. })));
    }

    #[tokio::test]
    async fn point_cut_is_applied_after_contour_cache_hit() {
        let image = target_photo();
        let strict = HoleDetectionConfig { min_contour_points: 10_000, ..Default::default() };

        let cold = PipelineExecutor::new(Arc::new(ThresholdContourExtractor::default()))
            .execute(&image, &crop(), &TargetType::Generic, &strict, ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert!(cold.candidates.is_empty());

        let warm_executor = PipelineExecutor::new(Arc::new(ThresholdContourExtractor::default()));
        let lenient = warm_executor
            .execute(&image, &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert_eq!(lenient.candidates.len(), 1);

        let warm = warm_executor
            .execute(&image, &crop(), &TargetType::Generic, &strict, ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert!(warm.stage_hits.contour);
        assert!(!warm.stage_hits.filter);
        assert_eq!(warm.candidates, cold.candidates);
        assert_eq!(warm.rejected, cold.rejected);

        let back = warm_executor
            .execute(&image, &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert_eq!(back.candidates, lenient.candidates);
    }

    #[tokio::test]
    async fn execute_path_decodes_off_the_runtime() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("target.png");
        target_photo().save(&path).expect("png written");

        let executor = PipelineExecutor::new(Arc::new(ThresholdContourExtractor::default()));
        let from_file = executor
            .execute_path(&path, &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert_eq!(from_file.candidates.len(), 1);

        let in_memory = executor
            .execute(&target_photo(), &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), ExecuteOptions::default())
            .await
            .expect("pipeline runs");
        assert_eq!(in_memory.image_hash, from_file.image_hash);
        assert!(in_memory.stage_hits.contour);

        let missing = executor
            .execute_path(dir.path().join("missing.png"), &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), ExecuteOptions::default())
            .await;
        assert!(matches!(missing, Err(VisionError::Decode(_))));
    }

    #[tokio::test]
    async fn extraction_failure_is_a_hard_error() {
        let executor = PipelineExecutor::new(Arc::new(FailingExtractor));
        let result = executor
            .execute(&target_photo(), &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), ExecuteOptions::default())
            .await;
        assert!(matches!(result, Err(VisionError::ContourExtraction { .. })));
    }

    #[tokio::test]
    async fn timeout_leaves_cache_untouched() {
        let executor = PipelineExecutor::new(Arc::new(StalledExtractor));
        let options = ExecuteOptions {
            contour_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let result = executor
            .execute(&target_photo(), &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), options)
            .await;
        assert!(matches!(result, Err(VisionError::ContourTimeout(_))));
        let stats = executor.cache().statistics().await.expect("actor alive");
        assert_eq!(stats.preprocessing_entries + stats.contour_entries + stats.filtering_entries, 0);
    }

    #[tokio::test]
    async fn abort_cancels_the_invocation() {
        let executor = PipelineExecutor::new(Arc::new(StalledExtractor));
        let (handle, registration) = AbortHandle::new_pair();
        handle.abort();
        let options = ExecuteOptions { abort: Some(registration), ..Default::default() };
        let result = executor
            .execute(&target_photo(), &crop(), &TargetType::Generic, &HoleDetectionConfig::default(), options)
            .await;
        assert!(matches!(result, Err(VisionError::Cancelled)));
        let stats = executor.cache().statistics().await.expect("actor alive");
        assert_eq!(stats.preprocessing_entries, 0);
    }

    #[tokio::test]
    async fn quality_gate_can_skip_detection() {
        let executor = PipelineExecutor::new(Arc::new(ThresholdContourExtractor::default()));
        let dark = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([10u8])));
        let options = ExecuteOptions { enforce_quality_gate: true, ..Default::default() };
        let report = executor
            .execute(&dark, &CropGeometry::full_frame(50, 50), &TargetType::Generic, &HoleDetectionConfig::default(), options)
            .await
            .expect("gate is not an error");
        assert!(!report.detection_ran);
        assert!(report.candidates.is_empty());
        assert_eq!(report.quality.exposure, Exposure::Underexposed);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_stage() {
        let executor = PipelineExecutor::new(Arc::new(ThresholdContourExtractor::default()));
        let config = HoleDetectionConfig { min_circularity: 2.0, ..Default::default() };
        let result = executor
            .execute(&target_photo(), &crop(), &TargetType::Generic, &config, ExecuteOptions::default())
            .await;
        assert!(matches!(result, Err(VisionError::InvalidConfig(_))));
    }

    #[test]
    fn filter_hash_tracks_crop_and_target() {
        let config = HoleDetectionConfig::default();
        let a = filter_config_hash(&config, &crop(), &TargetType::Generic);
        let moved = CropGeometry::new(PixelPoint::new(61.0, 60.0), 60.0, 60.0);
        assert_ne!(a, filter_config_hash(&config, &moved, &TargetType::Generic));
        assert_ne!(a, filter_config_hash(&config, &crop(), &TargetType::AirPistol10m));
        assert_eq!(a, filter_config_hash(&config, &crop(), &TargetType::Generic));
    }
}
