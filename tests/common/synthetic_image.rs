use image::{DynamicImage, GrayImage, Luma};

pub const PAPER: u8 = 225;
pub const HOLE: u8 = 20;

/// Bright paper with solid dark discs at `(cx, cy, radius)` pixel positions.
pub fn target_with_holes(width: u32, height: u32, holes: &[(f64, f64, f64)]) -> DynamicImage {
    assert!(width > 0 && height > 0, "image dimensions must be positive");

    let mut img = GrayImage::from_pixel(width, height, Luma([PAPER]));
    for y in 0..height {
        for x in 0..width {
            let inside = holes.iter().any(|&(cx, cy, r)| {
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                dx * dx + dy * dy <= r * r
            });
            if inside {
                img.put_pixel(x, y, Luma([HOLE]));
            }
        }
    }
    DynamicImage::ImageLuma8(img)
}

/// Four well separated holes on a 200x200 generic target, none on a ring line.
pub fn four_shot_group() -> DynamicImage {
    target_with_holes(
        200,
        200,
        &[(100.0, 100.0, 6.0), (115.0, 100.0, 6.0), (100.0, 125.0, 6.0), (75.0, 100.0, 6.0)],
    )
}
