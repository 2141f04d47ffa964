use crate::{AcquireError, CaptureConstraints, DeviceInfo};
use v4l::{Device, FourCC, video::Capture, video::capture::Parameters};

const FOURCC_YUYV: FourCC = FourCC { repr: *b"YUYV" };
const FOURCC_MJPG: FourCC = FourCC { repr: *b"MJPG" };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FOURCC_YUYV,
            PixelFormat::Mjpeg => FOURCC_MJPG,
        }
    }
}

/// The format the driver actually accepted.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub fps: f64,
}

pub fn list_devices() -> Vec<DeviceInfo> {
    v4l::context::enum_devices()
        .into_iter()
        .filter(|node| {
            Device::with_path(node.path())
                .and_then(|d| d.query_caps())
                .map(|caps| {
                    caps.capabilities
                        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                })
                .unwrap_or(false)
        })
        .map(|node| DeviceInfo::new(node.index() as u32, node.name()))
        .collect()
}

pub fn open_device(index: u32) -> Result<Device, AcquireError> {
    let device = Device::new(index as usize)?;
    let caps = device.query_caps()?;

    if !caps
        .capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
    {
        return Err(AcquireError::NotFound);
    }

    tracing::info!("Camera opened: {} ({})", caps.card, caps.driver);
    Ok(device)
}

/// Select best pixel format: prefer YUYV (faster decode), fallback to MJPEG
fn select_format(device: &Device) -> Result<PixelFormat, AcquireError> {
    let formats = device.enum_formats()?;

    tracing::debug!("Available formats:");
    for fmt in &formats {
        tracing::debug!("  {:?}: {}", fmt.fourcc, fmt.description);
    }

    if formats.iter().any(|f| f.fourcc == FOURCC_YUYV) {
        return Ok(PixelFormat::Yuyv);
    }

    if formats.iter().any(|f| f.fourcc == FOURCC_MJPG) {
        return Ok(PixelFormat::Mjpeg);
    }

    Err(AcquireError::Unsupported(format!(
        "camera supports neither YUYV nor MJPEG - available: {:?}",
        formats.iter().map(|f| f.fourcc).collect::<Vec<_>>()
    )))
}

/// Ask for the ideal resolution and frame rate, then check the driver's
/// answer against the hard ceilings.
pub fn negotiate(
    device: &Device,
    constraints: &CaptureConstraints,
) -> Result<NegotiatedFormat, AcquireError> {
    let pixel_format = select_format(device)?;

    let mut format = device.format()?;
    format.fourcc = pixel_format.fourcc();
    format.width = constraints.width.ideal;
    format.height = constraints.height.ideal;
    let format = device.set_format(&format)?;

    if format.fourcc != pixel_format.fourcc() {
        return Err(AcquireError::Unsupported(format!(
            "driver switched pixel format to {:?}",
            format.fourcc
        )));
    }

    if !constraints.admits(format.width, format.height) {
        return Err(AcquireError::Unsupported(format!(
            "driver offered {}x{}, limit is {}x{}",
            format.width, format.height, constraints.width.max, constraints.height.max
        )));
    }

    if let Some(rate) = constraints.frame_rate
        && let Err(e) = device.set_params(&Parameters::with_fps(rate.ideal))
    {
        tracing::debug!("Frame rate {} not accepted: {}", rate.ideal, e);
    }

    let params = device.params()?;
    let fps = if params.interval.numerator == 0 {
        0.0
    } else {
        params.interval.denominator as f64 / params.interval.numerator as f64
    };

    tracing::info!(
        "Capture format: {}x{} {:?} ({:?}) at {:.1} fps",
        format.width,
        format.height,
        format.fourcc,
        pixel_format,
        fps
    );

    Ok(NegotiatedFormat {
        width: format.width,
        height: format.height,
        pixel_format,
        fps,
    })
}
