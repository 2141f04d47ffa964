use crate::config::PipelineConfig;
use capture::Frame;
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// A downscaled, compressed copy of one [`Frame`], ready for transport.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub quality: f32,
    pub width: u32,
    pub height: u32,
    pub source_sequence: u64,
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Frame has no pixels")]
    EmptyFrame,

    #[error("Invalid pixel buffer: {0}")]
    Buffer(#[from] fast_image_resize::ImageBufferError),

    #[error("Resize failed: {0}")]
    Resize(#[from] fast_image_resize::ResizeError),

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Output size for a `width` x `height` source: the longest side becomes
/// `max_dimension`, aspect ratio is kept (floor-rounded) and nothing is upscaled.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }

    let scale = |side: u32| {
        let scaled = u64::from(side) * u64::from(max_dimension) / u64::from(longest);
        (scaled as u32).max(1)
    };
    (scale(width), scale(height))
}

/// Downsamples and JPEG-encodes frames on its own scratch buffers; the
/// display surface is never touched.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    max_dimension: u32,
    quality: f32,
}

impl FrameEncoder {
    pub fn new(max_dimension: u32, quality: f32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            quality: quality.clamp(f32::MIN_POSITIVE, 1.0),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_dimension, config.quality)
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    fn jpeg_quality(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }

    pub fn encode(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
        let _s = span!("encode_frame");

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(EncodeError::EmptyFrame);
        }

        let (out_width, out_height) = target_dimensions(width, height, self.max_dimension);

        let mut bytes = Vec::new();
        {
            let mut jpeg = JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality());
            if (out_width, out_height) == (width, height) {
                jpeg.encode(frame.pixels(), width, height, ExtendedColorType::Rgb8)?;
            } else {
                let scaled = self.downscale(frame, out_width, out_height)?;
                jpeg.encode(scaled.buffer(), out_width, out_height, ExtendedColorType::Rgb8)?;
            }
        }

        tracing::trace!(
            width,
            height,
            out_width,
            out_height,
            bytes = bytes.len(),
            "Frame encoded"
        );

        Ok(EncodedFrame {
            bytes,
            format: ImageFormat::Jpeg,
            quality: self.quality,
            width: out_width,
            height: out_height,
            source_sequence: frame.sequence(),
        })
    }

    fn downscale(
        &self,
        frame: &Frame,
        out_width: u32,
        out_height: u32,
    ) -> Result<Image<'static>, EncodeError> {
        let src = ImageRef::new(
            frame.width(),
            frame.height(),
            frame.pixels(),
            PixelType::U8x3,
        )?;
        let mut dst = Image::new(out_width, out_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        Ok(dst)
    }
}
