use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

/// One sampled image from a live source.
///
/// Cloning is cheap: the pixels sit behind an `Arc` and are never mutated
/// after capture.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Wraps packed RGB8 pixels; `None` when the buffer does not match the dimensions.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(|image| Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB8, row-major, no padding.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_checks_buffer_length() {
        assert!(Frame::from_rgb(2, 2, vec![0; 12], 0).is_some());
        assert!(Frame::from_rgb(2, 2, vec![0; 11], 0).is_none());
    }

    #[test]
    fn clones_share_pixels() {
        let frame = Frame::from_rgb(4, 2, vec![7; 24], 3).unwrap();
        let copy = frame.clone();
        assert_eq!(copy.dimensions(), (4, 2));
        assert_eq!(copy.sequence(), 3);
        assert!(std::ptr::eq(frame.pixels(), copy.pixels()));
    }
}
