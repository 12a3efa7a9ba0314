// THEORY:
// The `contour` module is the boundary to the shape-extraction primitive. The
// engine does not care how closed outlines are found; it only needs a list of
// polylines per grayscale image. That contract is the `ContourExtractor` trait:
//
// - Input: a grayscale raster.
// - Output: closed polylines in normalized [0,1]x[0,1] coordinates with the
//   origin at the BOTTOM-left (y grows upwards), each with at least 3 points.
//
// The module then does the measuring the rest of the pipeline needs: convert to
// pixel space (`x·width`, `(1−y)·height`), compute bounding box, area, perimeter,
// circularity `4π·area/perimeter²` and aspect ratio, and discard outlines with
// too few points to be trusted.
//
// `ThresholdContourExtractor` is a self-contained implementation: a global
// darkness threshold, 4-connected region growing (the same breadth-first growth
// the blob detector uses) and Moore-neighbor boundary tracing.

use crate::core_modules::geometry::{BoundingBox, PixelPoint};
use crate::core_modules::grayscale::grayscale::GrayscaleBuffer;
use crate::error::ContourError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::f64::consts::PI;
use std::sync::Arc;

/// A closed polyline in normalized, y-up coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedContour {
    pub points: Vec<(f64, f64)>,
}

/// Shape-extraction primitive plugged into the pipeline.
pub trait ContourExtractor: Send + Sync {
    fn extract(&self, image: Arc<GrayscaleBuffer>) -> BoxFuture<'static, Result<Vec<NormalizedContour>, ContourError>>;
}

/// A measured outline in pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedContour {
    pub bounding_box: BoundingBox,
    /// Mean of the boundary points.
    pub center_pixel: PixelPoint,
    /// Enclosed polygon area in square pixels.
    pub area: f64,
    pub perimeter: f64,
    /// `4π·area/perimeter²`, 1.0 for a perfect circle.
    pub circularity: f64,
    /// Bounding box width over height.
    pub aspect_ratio: f64,
    pub points: Vec<PixelPoint>,
}

impl DetectedContour {
    /// Measures a pixel-space polyline. `None` for fewer than 3 points.
    pub fn measure(points: Vec<PixelPoint>) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let bounding_box = BoundingBox::enclosing(&points)?;

        let mut twice_area = 0.0;
        let mut perimeter = 0.0;
        for (i, p) in points.iter().enumerate() {
            let q = &points[(i + 1) % points.len()];
            twice_area += p.x * q.y - q.x * p.y;
            perimeter += p.distance_to(q);
        }
        let area = twice_area.abs() / 2.0;
        let circularity = if perimeter > 0.0 { 4.0 * PI * area / (perimeter * perimeter) } else { 0.0 };

        let n = points.len() as f64;
        let center_pixel = PixelPoint::new(
            points.iter().map(|p| p.x).sum::<f64>() / n,
            points.iter().map(|p| p.y).sum::<f64>() / n,
        );
        let aspect_ratio = if bounding_box.height() > 0.0 {
            bounding_box.width() / bounding_box.height()
        } else {
            0.0
        };

        Some(Self {
            bounding_box,
            center_pixel,
            area,
            perimeter,
            circularity,
            aspect_ratio,
            points,
        })
    }

    /// Diameter of the circle with the same area.
    pub fn effective_diameter(&self) -> f64 {
        2.0 * (self.area / PI).sqrt()
    }
}

/// Fewest points an outline can have and still enclose an area.
pub const MIN_CLOSED_POINTS: usize = 3;

/// Output of the contour stage, cached per image.
#[derive(Debug, Clone, Default)]
pub struct ContourDetectionResult {
    pub contours: Vec<DetectedContour>,
    /// Outlines dropped for having too few points.
    pub discarded_count: usize,
}

impl ContourDetectionResult {
    /// Copy keeping only contours with at least `min_points` points.
    /// The cached result holds every measurable outline; this applies the
    /// per-configuration cut on top of it.
    pub fn with_min_points(&self, min_points: usize) -> Self {
        let (kept, dropped): (Vec<_>, Vec<_>) = self
            .contours
            .iter()
            .cloned()
            .partition(|contour| contour.points.len() >= min_points);
        Self {
            contours: kept,
            discarded_count: self.discarded_count + dropped.len(),
        }
    }
}

/// Converts extractor output into measured pixel-space contours.
pub fn to_pixel_contours(
    raw: Vec<NormalizedContour>,
    width: u32,
    height: u32,
    min_points: usize,
) -> ContourDetectionResult {
    let (w, h) = (width as f64, height as f64);
    let mut result = ContourDetectionResult::default();
    for contour in raw {
        if contour.points.len() < min_points {
            result.discarded_count += 1;
            continue;
        }
        let points = contour
            .points
            .iter()
            .map(|&(nx, ny)| PixelPoint::new(nx * w, (1.0 - ny) * h))
            .collect();
        match DetectedContour::measure(points) {
            Some(measured) => result.contours.push(measured),
            None => result.discarded_count += 1,
        }
    }
    result
}

// Clockwise in image coordinates (y down), starting east.
const MOORE: [(i64, i64); 8] = [(1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0), (-1, -1), (0, -1), (1, -1)];
const WEST: usize = 4;

/// Dark-region extractor: threshold, region growing, boundary tracing.
#[derive(Debug, Clone)]
pub struct ThresholdContourExtractor {
    /// A pixel is "ink" when darker than `mean · relative_threshold`.
    pub relative_threshold: f64,
    /// Fixed threshold overriding the relative one.
    pub fixed_threshold: Option<u8>,
    /// Regions smaller than this many pixels are ignored.
    pub min_region_pixels: usize,
}

impl Default for ThresholdContourExtractor {
    fn default() -> Self {
        Self {
            relative_threshold: 0.5,
            fixed_threshold: None,
            min_region_pixels: 4,
        }
    }
}

impl ThresholdContourExtractor {
    pub fn threshold_for(&self, image: &GrayscaleBuffer) -> u8 {
        if let Some(fixed) = self.fixed_threshold {
            return fixed;
        }
        if image.is_empty() {
            return 0;
        }
        let mean = image.pixels().iter().map(|&v| v as f64).sum::<f64>() / image.pixel_count() as f64;
        (mean * self.relative_threshold).clamp(0.0, 255.0) as u8
    }

    /// Synchronous extraction on the calling thread.
    pub fn extract_blocking(&self, image: &GrayscaleBuffer) -> Vec<NormalizedContour> {
        let (w, h) = (image.width as usize, image.height as usize);
        if w == 0 || h == 0 {
            return Vec::new();
        }
        let threshold = self.threshold_for(image);
        let ink: Vec<bool> = image.pixels().iter().map(|&v| v < threshold).collect();
        let mut label = vec![0u32; w * h];
        let mut next_label = 1u32;
        let mut contours = Vec::new();

        for start in 0..w * h {
            if !ink[start] || label[start] != 0 {
                continue;
            }
            let size = grow_region(start, next_label, &ink, &mut label, w, h);
            if size >= self.min_region_pixels {
                // Raster order guarantees `start` is the region's top-left pixel.
                let boundary = trace_boundary(start, next_label, &label, w, h, size);
                if boundary.len() >= 3 {
                    let points = boundary
                        .into_iter()
                        .map(|(x, y)| (x as f64 / w as f64, 1.0 - y as f64 / h as f64))
                        .collect();
                    contours.push(NormalizedContour { points });
                }
            }
            next_label += 1;
        }
        contours
    }
}

impl ContourExtractor for ThresholdContourExtractor {
    fn extract(&self, image: Arc<GrayscaleBuffer>) -> BoxFuture<'static, Result<Vec<NormalizedContour>, ContourError>> {
        let extractor = self.clone();
        async move {
            tokio::task::spawn_blocking(move || extractor.extract_blocking(&image))
                .await
                .map_err(|err| ContourError::Failed(err.to_string()))
        }
        .boxed()
    }
}

/// Breadth-first 4-connected growth; returns the region size.
fn grow_region(start: usize, region: u32, ink: &[bool], label: &mut [u32], w: usize, h: usize) -> usize {
    let mut queue = vec![start];
    label[start] = region;
    let mut size = 0;
    while let Some(current) = queue.pop() {
        size += 1;
        let (x, y) = ((current % w) as i64, (current / w) as i64);
        for (dx, dy) in [(0, 1), (0, -1), (1, 0), (-1, 0)] {
            let (nx, ny) = (x + dx, y + dy);
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                continue;
            }
            let index = ny as usize * w + nx as usize;
            if ink[index] && label[index] == 0 {
                label[index] = region;
                queue.push(index);
            }
        }
    }
    size
}

/// Moore-neighbor tracing from the region's top-left pixel, clockwise.
fn trace_boundary(start: usize, region: u32, label: &[u32], w: usize, h: usize, size: usize) -> Vec<(i64, i64)> {
    let inside = |x: i64, y: i64| {
        x >= 0 && y >= 0 && x < w as i64 && y < h as i64 && label[y as usize * w + x as usize] == region
    };
    let origin = ((start % w) as i64, (start / w) as i64);
    let mut boundary = vec![origin];
    let mut current = origin;
    let mut backtrack = WEST;
    let mut first_direction: Option<usize> = None;
    let max_steps = 4 * size + 8;

    for _ in 0..max_steps {
        let next = (1..=8).map(|i| (backtrack + i) % 8).find(|&d| {
            let (dx, dy) = MOORE[d];
            inside(current.0 + dx, current.1 + dy)
        });
        let Some(direction) = next else {
            break;
        };
        if current == origin {
            match first_direction {
                Some(first) if first == direction => break,
                None => first_direction = Some(direction),
                _ => {}
            }
        }
        let (dx, dy) = MOORE[direction];
        let (bx, by) = MOORE[(direction + 7) % 8];
        let moved = (current.0 + dx, current.1 + dy);
        // The last background pixel examined, seen from the new position.
        let offset = (current.0 + bx - moved.0, current.1 + by - moved.1);
        backtrack = MOORE.iter().position(|&d| d == offset).unwrap_or(WEST);
        current = moved;
        boundary.push(current);
    }

    if boundary.len() > 1 && boundary.last() == boundary.first() {
        boundary.pop();
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disc(size: u32, cx: f64, cy: f64, radius: f64) -> GrayscaleBuffer {
        let pixels = (0..size * size)
            .map(|i| {
                let (x, y) = ((i % size) as f64, (i / size) as f64);
                if ((x - cx).powi(2) + (y - cy).powi(2)).sqrt() <= radius { 20 } else { 230 }
            })
            .collect();
        GrayscaleBuffer::new(size, size, pixels).expect("square buffer")
    }

    #[test]
    fn unit_square_measurements() {
        let square = vec![
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(10.0, 0.0),
            PixelPoint::new(10.0, 10.0),
            PixelPoint::new(0.0, 10.0),
        ];
        let c = DetectedContour::measure(square).expect("4 points");
        assert_eq!(c.area, 100.0);
        assert_eq!(c.perimeter, 40.0);
        assert!((c.circularity - PI / 4.0).abs() < 1e-12);
        assert_eq!(c.aspect_ratio, 1.0);
        assert_eq!(c.center_pixel, PixelPoint::new(5.0, 5.0));
    }

    #[test]
    fn conversion_flips_y_axis() {
        let raw = vec![NormalizedContour {
            points: vec![(0.1, 0.9), (0.2, 0.9), (0.2, 0.8), (0.15, 0.75), (0.1, 0.8), (0.1, 0.85)],
        }];
        let result = to_pixel_contours(raw, 100, 200, 6);
        let first = result.contours[0].points[0];
        assert!((first.x - 10.0).abs() < 1e-9);
        assert!((first.y - 20.0).abs() < 1e-9);
    }

    #[test]
    fn short_contours_are_discarded() {
        let raw = vec![
            NormalizedContour { points: vec![(0.0, 0.0), (0.5, 0.0), (0.5, 0.5)] },
            NormalizedContour { points: vec![(0.0, 0.0); 5] },
        ];
        let result = to_pixel_contours(raw, 10, 10, 6);
        assert!(result.contours.is_empty());
        assert_eq!(result.discarded_count, 2);
    }

    #[test]
    fn point_cut_applies_on_top_of_measured_contours() {
        let octagon: Vec<(f64, f64)> = (0..8)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::FRAC_PI_4;
                (0.5 + 0.2 * angle.cos(), 0.5 + 0.2 * angle.sin())
            })
            .collect();
        let raw = vec![
            NormalizedContour { points: octagon.clone() },
            NormalizedContour { points: octagon[..4].to_vec() },
        ];
        let all = to_pixel_contours(raw, 50, 50, MIN_CLOSED_POINTS);
        assert_eq!(all.contours.len(), 2);

        let strict = all.with_min_points(6);
        assert_eq!(strict.contours.len(), 1);
        assert_eq!(strict.contours[0].points.len(), 8);
        assert_eq!(strict.discarded_count, 1);
        assert_eq!(all.with_min_points(MIN_CLOSED_POINTS).contours.len(), 2);
    }

    #[test]
    fn traced_disc_is_round_and_centered() {
        let image = disc(100, 50.0, 50.0, 6.0);
        let raw = ThresholdContourExtractor::default().extract_blocking(&image);
        assert_eq!(raw.len(), 1);
        let result = to_pixel_contours(raw, 100, 100, 6);
        let c = &result.contours[0];
        assert!(c.center_pixel.distance_to(&PixelPoint::new(50.0, 50.0)) < 0.5, "{:?}", c.center_pixel);
        assert!(c.circularity > 0.75, "circularity {}", c.circularity);
        let d = c.effective_diameter();
        assert!((8.0..=16.0).contains(&d), "diameter {d}");
    }

    #[test]
    fn separate_regions_yield_separate_contours() {
        let mut pixels = vec![230u8; 60 * 60];
        for (cx, cy) in [(15i64, 15i64), (45, 40)] {
            for y in cy - 3..=cy + 3 {
                for x in cx - 3..=cx + 3 {
                    pixels[(y * 60 + x) as usize] = 10;
                }
            }
        }
        let image = GrayscaleBuffer::new(60, 60, pixels).expect("60x60");
        let raw = ThresholdContourExtractor::default().extract_blocking(&image);
        assert_eq!(raw.len(), 2);
        assert!(raw.iter().all(|c| c.points.len() == 24));
    }

    #[test]
    fn specks_below_min_region_are_ignored() {
        let mut pixels = vec![230u8; 20 * 20];
        pixels[5 * 20 + 5] = 0;
        let image = GrayscaleBuffer::new(20, 20, pixels).expect("20x20");
        assert!(ThresholdContourExtractor::default().extract_blocking(&image).is_empty());
    }

    #[tokio::test]
    async fn async_extraction_matches_blocking() {
        let image = Arc::new(disc(64, 30.0, 20.0, 5.0));
        let extractor = ThresholdContourExtractor::default();
        let blocking = extractor.extract_blocking(&image);
        let extracted = extractor.extract(image).await.expect("extraction succeeds");
        assert_eq!(extracted, blocking);
    }
}
