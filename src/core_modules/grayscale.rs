// THEORY:
// The `grayscale` module is the leaf of the whole engine. Every other component
// reads intensities, never colors, so the first thing any image goes through is
// a conversion to a flat buffer of 8-bit luma values.
//
// Key architectural principles:
// 1.  **Immutable Data Container**: A `GrayscaleBuffer` is a "dumb" container
//     (width, height, pixels). Once constructed it is never mutated; stages that
//     need to share it wrap it in an `Arc`.
// 2.  **Single Luma Formula**: Rec. 601 weights, applied once per pixel.
// 3.  **Content Identity**: The buffer can hash its own dimensions and bytes.
//     This hash is the key the stage cache uses, so identical bytes always
//     map to the same cache slot across runs.

pub mod grayscale {
    use image::DynamicImage;
    use sha2::{Digest, Sha256};

    pub type Intensity = u8;

    const LUMA_RED: f32 = 0.299;
    const LUMA_GREEN: f32 = 0.587;
    const LUMA_BLUE: f32 = 0.114;

    /// A row-major buffer of 8-bit intensities.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct GrayscaleBuffer {
        /// Width of the image in pixels.
        pub width: u32,
        /// Height of the image in pixels.
        pub height: u32,
        pixels: Vec<Intensity>,
    }

    impl GrayscaleBuffer {
        /// Wraps an existing luma buffer. Returns `None` if the length does not
        /// match `width * height`.
        pub fn new(width: u32, height: u32, pixels: Vec<Intensity>) -> Option<Self> {
            if pixels.len() != width as usize * height as usize {
                return None;
            }
            Some(Self { width, height, pixels })
        }

        /// A buffer where every pixel has the same value.
        pub fn filled(width: u32, height: u32, value: Intensity) -> Self {
            Self {
                width,
                height,
                pixels: vec![value; width as usize * height as usize],
            }
        }

        /// Converts a tightly packed RGBA8 buffer.
        pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> Option<Self> {
            Self::from_interleaved(width, height, rgba, 4)
        }

        /// Converts a tightly packed RGB8 buffer.
        pub fn from_rgb(width: u32, height: u32, rgb: &[u8]) -> Option<Self> {
            Self::from_interleaved(width, height, rgb, 3)
        }

        fn from_interleaved(width: u32, height: u32, bytes: &[u8], channels: usize) -> Option<Self> {
            let pixel_count = width as usize * height as usize;
            if bytes.len() != pixel_count * channels {
                return None;
            }
            let pixels = bytes
                .chunks_exact(channels)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect();
            Some(Self { width, height, pixels })
        }

        /// Converts any decoded image.
        pub fn from_image(image: &DynamicImage) -> Self {
            let rgba = image.to_rgba8();
            let (width, height) = rgba.dimensions();
            let pixels = rgba.pixels().map(|p| luma(p[0], p[1], p[2])).collect();
            Self { width, height, pixels }
        }

        pub fn pixel_count(&self) -> usize {
            self.pixels.len()
        }

        pub fn is_empty(&self) -> bool {
            self.pixels.is_empty()
        }

        pub fn pixels(&self) -> &[Intensity] {
            &self.pixels
        }

        /// Intensity at `(x, y)`. Callers are responsible for bounds.
        #[inline]
        pub fn get(&self, x: u32, y: u32) -> Intensity {
            self.pixels[y as usize * self.width as usize + x as usize]
        }

        /// Intensity at signed coordinates, `None` outside the image.
        #[inline]
        pub fn get_checked(&self, x: i64, y: i64) -> Option<Intensity> {
            if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                return None;
            }
            Some(self.get(x as u32, y as u32))
        }

        /// Hex SHA-256 over the dimensions and the pixel bytes.
        pub fn content_hash(&self) -> String {
            let mut hasher = Sha256::new();
            hasher.update(self.width.to_le_bytes());
            hasher.update(self.height.to_le_bytes());
            hasher.update(&self.pixels);
            format!("{:x}", hasher.finalize())
        }
    }

    #[inline]
    fn luma(r: u8, g: u8, b: u8) -> Intensity {
        let y = LUMA_RED * r as f32 + LUMA_GREEN * g as f32 + LUMA_BLUE * b as f32;
        y.round().clamp(0.0, 255.0) as Intensity
    }

    /// Hex SHA-256 over the raw bytes of a decoded image, used as the image
    /// cache key before any conversion happens.
    pub fn image_content_hash(image: &DynamicImage) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image.width().to_le_bytes());
        hasher.update(image.height().to_le_bytes());
        hasher.update(format!("{:?}", image.color()).as_bytes());
        hasher.update(image.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::grayscale::*;
    use image::{DynamicImage, RgbaImage};

    #[test]
    fn rgba_white_and_black_map_to_extremes() {
        let rgba = [255, 255, 255, 255, 0, 0, 0, 255];
        let gray = GrayscaleBuffer::from_rgba(2, 1, &rgba).expect("length matches");
        assert_eq!(gray.pixels(), &[255, 0]);
    }

    #[test]
    fn mismatched_length_is_rejected() {
        assert!(GrayscaleBuffer::from_rgba(2, 2, &[0u8; 12]).is_none());
        assert!(GrayscaleBuffer::new(3, 3, vec![0; 8]).is_none());
    }

    #[test]
    fn pure_green_uses_rec601_weight() {
        let gray = GrayscaleBuffer::from_rgb(1, 1, &[0, 255, 0]).expect("length matches");
        assert_eq!(gray.get(0, 0), 150);
    }

    #[test]
    fn image_conversion_keeps_dimensions() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(7, 3, image::Rgba([10, 10, 10, 255])));
        let gray = GrayscaleBuffer::from_image(&img);
        assert_eq!((gray.width, gray.height), (7, 3));
        assert!(gray.pixels().iter().all(|&v| v == 10));
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let a = GrayscaleBuffer::filled(4, 4, 100);
        let b = GrayscaleBuffer::filled(4, 4, 100);
        let c = GrayscaleBuffer::filled(4, 4, 101);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn checked_access_rejects_out_of_bounds() {
        let gray = GrayscaleBuffer::filled(2, 2, 9);
        assert_eq!(gray.get_checked(1, 1), Some(9));
        assert_eq!(gray.get_checked(-1, 0), None);
        assert_eq!(gray.get_checked(2, 0), None);
    }
}
