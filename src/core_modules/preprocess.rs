// THEORY:
// Preprocessing turns the decoded photo into the two rasters every later stage
// reads: the grayscale buffer and a gradient-magnitude edge map. Both depend on
// the image bytes only, so the result is cached by image hash.
//
// The edge map is a 3x3 Sobel pair combined as `sqrt(gx² + gy²)`. It is optional
// because images smaller than the kernel have no interior to convolve.

use crate::core_modules::geometry::PixelPoint;
use crate::core_modules::grayscale::grayscale::GrayscaleBuffer;
use std::sync::Arc;

const SOBEL_X: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const SOBEL_Y: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

/// Gradient magnitude per pixel. Border pixels are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMap {
    pub width: u32,
    pub height: u32,
    magnitudes: Vec<f32>,
}

impl EdgeMap {
    pub fn compute(image: &GrayscaleBuffer) -> Option<Self> {
        if image.width < 3 || image.height < 3 {
            return None;
        }
        let (w, h) = (image.width, image.height);
        let mut magnitudes = vec![0.0f32; w as usize * h as usize];
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let mut gx = 0i32;
                let mut gy = 0i32;
                for ky in 0..3 {
                    for kx in 0..3 {
                        let v = image.get(x + kx as u32 - 1, y + ky as u32 - 1) as i32;
                        gx += SOBEL_X[ky][kx] * v;
                        gy += SOBEL_Y[ky][kx] * v;
                    }
                }
                magnitudes[y as usize * w as usize + x as usize] = ((gx * gx + gy * gy) as f32).sqrt();
            }
        }
        Some(Self { width: w, height: h, magnitudes })
    }

    pub fn magnitude(&self, x: u32, y: u32) -> f32 {
        self.magnitudes[y as usize * self.width as usize + x as usize]
    }

    /// Mean magnitude at the given points, skipping points outside the map.
    pub fn mean_along(&self, points: &[PixelPoint]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for p in points {
            let (x, y) = (p.x.round(), p.y.round());
            if x < 0.0 || y < 0.0 || x >= self.width as f64 || y >= self.height as f64 {
                continue;
            }
            sum += self.magnitude(x as u32, y as u32) as f64;
            count += 1;
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }
}

/// Output of the preprocessing stage.
#[derive(Debug, Clone)]
pub struct PreprocessingResult {
    pub grayscale: Arc<GrayscaleBuffer>,
    pub edge_map: Option<Arc<EdgeMap>>,
}

impl PreprocessingResult {
    pub fn build(grayscale: GrayscaleBuffer) -> Self {
        Self::from_shared(Arc::new(grayscale))
    }

    /// Builds the edge map for a buffer another stage already converted.
    pub fn from_shared(grayscale: Arc<GrayscaleBuffer>) -> Self {
        let edge_map = EdgeMap::compute(&grayscale).map(Arc::new);
        Self { grayscale, edge_map }
    }
}
