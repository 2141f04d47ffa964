use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use image::RgbImage;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// What the last draw put on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drawn {
    /// Annotated image of the analysis request with this sequence.
    Annotated { sequence: u64 },
    /// Raw capture frame with this capture sequence.
    Live { sequence: u64 },
}

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Surface has no size")]
    Unsized,

    #[error("Invalid pixel buffer: {0}")]
    Buffer(#[from] fast_image_resize::ImageBufferError),

    #[error("Resize failed: {0}")]
    Resize(#[from] fast_image_resize::ResizeError),
}

/// Target the display loop renders into.
pub trait RenderSurface: Send {
    fn size(&self) -> (u32, u32);

    /// Later draws are stretched to the new size. Current content is dropped.
    fn resize(&mut self, width: u32, height: u32);

    /// Draws `image` stretched over the whole surface.
    fn draw(&mut self, image: &RgbImage, content: Drawn) -> Result<(), SurfaceError>;

    fn clear(&mut self);

    fn is_blank(&self) -> bool;

    fn last_drawn(&self) -> Option<Drawn>;

    /// Current pixels, `None` when blank.
    fn pixels(&self) -> Option<&RgbImage>;
}

pub type SharedSurface = Arc<Mutex<dyn RenderSurface>>;

/// Off-screen RGB surface.
pub struct FrameSurface {
    width: u32,
    height: u32,
    canvas: Option<RgbImage>,
    last: Option<Drawn>,
    draws: u64,
    resizer: Resizer,
}

impl FrameSurface {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            canvas: None,
            last: None,
            draws: 0,
            resizer: Resizer::new(),
        }
    }

    pub fn shared() -> SharedSurface {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn draw_count(&self) -> u64 {
        self.draws
    }
}

impl Default for FrameSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for FrameSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            tracing::debug!(width, height, "Surface resized");
            self.width = width;
            self.height = height;
            self.canvas = None;
            self.last = None;
        }
    }

    fn draw(&mut self, image: &RgbImage, content: Drawn) -> Result<(), SurfaceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SurfaceError::Unsized);
        }

        let (width, height) = (self.width, self.height);
        let canvas = self
            .canvas
            .get_or_insert_with(|| RgbImage::new(width, height));
        stretch_into(&mut self.resizer, image, canvas)?;

        self.last = Some(content);
        self.draws += 1;
        Ok(())
    }

    fn clear(&mut self) {
        self.canvas = None;
        self.last = None;
    }

    fn is_blank(&self) -> bool {
        self.canvas.is_none()
    }

    fn last_drawn(&self) -> Option<Drawn> {
        self.last
    }

    fn pixels(&self) -> Option<&RgbImage> {
        self.canvas.as_ref()
    }
}

/// Returns `image` stretched to `width` x `height`.
pub fn stretch(
    resizer: &mut Resizer,
    image: &RgbImage,
    width: u32,
    height: u32,
) -> Result<RgbImage, SurfaceError> {
    if width == 0 || height == 0 {
        return Err(SurfaceError::Unsized);
    }
    let mut out = RgbImage::new(width, height);
    stretch_into(resizer, image, &mut out)?;
    Ok(out)
}

fn stretch_into(
    resizer: &mut Resizer,
    image: &RgbImage,
    canvas: &mut RgbImage,
) -> Result<(), SurfaceError> {
    let (width, height) = canvas.dimensions();
    if image.dimensions() == (width, height) {
        canvas.copy_from_slice(image.as_raw());
        return Ok(());
    }

    let src = ImageRef::new(
        image.width(),
        image.height(),
        image.as_raw(),
        PixelType::U8x3,
    )?;
    let mut dst = Image::from_slice_u8(width, height, &mut **canvas, PixelType::U8x3)?;
    resizer.resize(
        &src,
        &mut dst,
        &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
    )?;
    Ok(())
}

/// Largest size with the source's aspect ratio that fits the container.
pub fn fit_within(
    source_width: u32,
    source_height: u32,
    container_width: u32,
    container_height: u32,
) -> (u32, u32) {
    if source_width == 0 || source_height == 0 || container_width == 0 || container_height == 0 {
        return (0, 0);
    }

    let (sw, sh) = (u64::from(source_width), u64::from(source_height));
    let (cw, ch) = (u64::from(container_width), u64::from(container_height));

    // Container is wider than the source: height bound.
    if cw * sh > ch * sw {
        ((ch * sw / sh) as u32, container_height)
    } else {
        (container_width, (cw * sh / sw) as u32)
    }
}
