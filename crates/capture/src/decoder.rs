use crate::Frame;
use anyhow::{Result, anyhow};
use common::span;

/// Turns one raw device buffer into an RGB [`Frame`].
pub trait FrameDecoder: Send {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32, sequence: u64) -> Result<Frame>;
}

/// YUYV (YUV 4:2:2) decoder.
///
/// YUYV packs 2 pixels in 4 bytes: [Y0, U, Y1, V]
#[derive(Debug, Default)]
pub struct YuyvDecoder;

impl FrameDecoder for YuyvDecoder {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32, sequence: u64) -> Result<Frame> {
        let _s = span!("decode_yuyv");

        if width == 0 || height == 0 || width % 2 != 0 {
            return Err(anyhow!("Invalid YUYV dimensions {}x{}", width, height));
        }

        let bytes_per_row = (width * 2) as usize;
        if raw.len() < bytes_per_row * height as usize {
            return Err(anyhow!(
                "Short YUYV buffer: expected at least {} bytes, got {}",
                bytes_per_row * height as usize,
                raw.len()
            ));
        }
        // Drivers may pad rows
        let stride = raw.len() / height as usize;

        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for row in 0..height as usize {
            let row_start = row * stride;
            let row_data = &raw[row_start..row_start + bytes_per_row];

            for chunk in row_data.chunks_exact(4) {
                let y0 = chunk[0] as i32;
                let u = chunk[1] as i32 - 128;
                let y1 = chunk[2] as i32;
                let v = chunk[3] as i32 - 128;

                // BT.601 fixed-point coefficients (8-bit fraction)
                let rv = (359 * v) >> 8;
                let gu = (88 * u + 183 * v) >> 8;
                let bu = (454 * u) >> 8;

                for y in [y0, y1] {
                    rgb.push((y + rv).clamp(0, 255) as u8);
                    rgb.push((y - gu).clamp(0, 255) as u8);
                    rgb.push((y + bu).clamp(0, 255) as u8);
                }
            }
        }

        Frame::from_rgb(width, height, rgb, sequence)
            .ok_or_else(|| anyhow!("Decoded YUYV buffer does not match {}x{}", width, height))
    }
}

/// MJPEG decoder using turbojpeg (libjpeg-turbo)
#[cfg(feature = "v4l2")]
pub struct MjpegDecoder {
    decompressor: turbojpeg::Decompressor,
}

#[cfg(feature = "v4l2")]
impl MjpegDecoder {
    pub fn try_new() -> Result<Self> {
        Ok(Self {
            decompressor: turbojpeg::Decompressor::new()?,
        })
    }
}

#[cfg(feature = "v4l2")]
impl FrameDecoder for MjpegDecoder {
    fn decode(&mut self, raw: &[u8], _width: u32, _height: u32, sequence: u64) -> Result<Frame> {
        let _s = span!("decode_mjpeg");

        // The JPEG header is authoritative, some drivers report stale sizes
        let header = self.decompressor.read_header(raw)?;
        let width = header.width;
        let height = header.height;

        let mut rgb = vec![0u8; width * height * 3];
        let output = turbojpeg::Image {
            pixels: rgb.as_mut_slice(),
            width,
            pitch: width * 3,
            height,
            format: turbojpeg::PixelFormat::RGB,
        };
        self.decompressor.decompress(raw, output)?;

        Frame::from_rgb(width as u32, height as u32, rgb, sequence)
            .ok_or_else(|| anyhow!("Decoded MJPEG buffer does not match {}x{}", width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_decoder_basic() {
        let mut decoder = YuyvDecoder;
        // 2x1 image, neutral chroma
        let yuyv = vec![128, 128, 128, 128];
        let frame = decoder.decode(&yuyv, 2, 1, 7).unwrap();
        assert_eq!(frame.dimensions(), (2, 1));
        assert_eq!(frame.pixels(), &[128, 128, 128, 128, 128, 128]);
        assert_eq!(frame.sequence(), 7);
    }

    #[test]
    fn test_yuyv_decoder_handles_row_padding() {
        let mut decoder = YuyvDecoder;
        // 2x2 image, rows padded from 4 to 8 bytes
        let yuyv = vec![
            16, 128, 16, 128, 0, 0, 0, 0, //
            235, 128, 235, 128, 0, 0, 0, 0,
        ];
        let frame = decoder.decode(&yuyv, 2, 2, 0).unwrap();
        assert_eq!(frame.image().get_pixel(0, 0).0, [16, 16, 16]);
        assert_eq!(frame.image().get_pixel(1, 1).0, [235, 235, 235]);
    }

    #[test]
    fn test_yuyv_decoder_rejects_short_buffer() {
        let mut decoder = YuyvDecoder;
        assert!(decoder.decode(&[0, 1, 2], 2, 1, 0).is_err());
        assert!(decoder.decode(&[0; 8], 3, 1, 0).is_err());
    }

    #[cfg(feature = "v4l2")]
    #[test]
    fn test_mjpeg_decoder_invalid_data() {
        let mut decoder = MjpegDecoder::try_new().unwrap();
        let invalid = vec![0, 1, 2, 3];
        assert!(decoder.decode(&invalid, 640, 480, 0).is_err());
    }
}
