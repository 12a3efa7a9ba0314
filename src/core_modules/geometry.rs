// THEORY:
// The `geometry` module holds the two coordinate systems the engine works in and
// the bridge between them.
//
// - Pixel space: image coordinates, x to the right, y downwards.
// - Target space: the target's ring system centered at the origin with the outer
//   scoring ring at radius ~1.0, x to the right, y upwards.
//
// `CropGeometry` is supplied by the upstream geometry collaborator. It describes
// where the target sits in the photo (center plus two semi-axes, so a slightly
// tilted photo produces an ellipse rather than a circle) and converts between the
// two spaces.

use serde::{Deserialize, Serialize};

/// A point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &PixelPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned box in pixel coordinates, stored as min/max corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Smallest box enclosing every point. `None` for an empty slice.
    pub fn enclosing(points: &[PixelPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for p in &points[1..] {
            bbox.min_x = bbox.min_x.min(p.x);
            bbox.min_y = bbox.min_y.min(p.y);
            bbox.max_x = bbox.max_x.max(p.x);
            bbox.max_y = bbox.max_y.max(p.y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint::new((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }
}

/// A position in target-relative units. The scoring rings are centered at the
/// origin and the outermost ring has radius 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedTargetPosition {
    pub x: f64,
    pub y: f64,
}

impl NormalizedTargetPosition {
    pub const CENTER: NormalizedTargetPosition = NormalizedTargetPosition { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Distance from the target center.
    pub fn radial_distance(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance_to(&self, other: &NormalizedTargetPosition) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Angle in degrees, counter-clockwise from the positive x axis, in (-180, 180].
    pub fn angle_degrees(&self) -> f64 {
        self.y.atan2(self.x).to_degrees()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Location of the target inside a photo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropGeometry {
    /// Target center in pixels.
    pub center: PixelPoint,
    /// Horizontal semi-axis of the outer scoring ring, in pixels.
    pub radius_x: f64,
    /// Vertical semi-axis of the outer scoring ring, in pixels.
    pub radius_y: f64,
}

impl CropGeometry {
    pub fn new(center: PixelPoint, radius_x: f64, radius_y: f64) -> Self {
        Self { center, radius_x, radius_y }
    }

    /// Target filling the image: centered, semi-axes at half the image size.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            center: PixelPoint::new(width as f64 / 2.0, height as f64 / 2.0),
            radius_x: width as f64 / 2.0,
            radius_y: height as f64 / 2.0,
        }
    }

    /// Pixel position to target space. The y axis flips so "up" is positive.
    pub fn to_target(&self, pixel: PixelPoint) -> NormalizedTargetPosition {
        let rx = self.radius_x.max(f64::EPSILON);
        let ry = self.radius_y.max(f64::EPSILON);
        NormalizedTargetPosition {
            x: (pixel.x - self.center.x) / rx,
            y: (self.center.y - pixel.y) / ry,
        }
    }

    pub fn to_pixel(&self, position: NormalizedTargetPosition) -> PixelPoint {
        PixelPoint {
            x: self.center.x + position.x * self.radius_x,
            y: self.center.y - position.y * self.radius_y,
        }
    }

    /// Distance of a pixel from the center in units of the ellipse semi-axes.
    pub fn elliptical_distance(&self, pixel: PixelPoint) -> f64 {
        self.to_target(pixel).radial_distance()
    }

    /// Ratio of the shorter to the longer semi-axis; 1.0 is a head-on photo.
    pub fn axis_ratio(&self) -> f64 {
        let long = self.radius_x.max(self.radius_y);
        if long <= 0.0 {
            return 1.0;
        }
        self.radius_x.min(self.radius_y) / long
    }
}
