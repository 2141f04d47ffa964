//! JSON wire format of the analysis service.
//!
//! Images travel as data URLs (`data:image/jpeg;base64,...`); responses may
//! also carry bare base64.

use crate::client::{AnalysisError, AnalysisResult, AnnotatedImage};
use crate::encoder::{EncodedFrame, ImageFormat};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct AnalysisRequest {
    pub image: String,
}

impl AnalysisRequest {
    pub fn from_frame(frame: &EncodedFrame) -> Self {
        Self {
            image: to_data_url(frame.format, &frame.bytes),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisResponse {
    pub success: Option<bool>,
    pub processed_image: Option<String>,
    pub fps: Option<f64>,
    pub total_persons: Option<u32>,
    pub error: Option<String>,
}

impl AnalysisResponse {
    pub fn into_result(self) -> Result<AnalysisResult, AnalysisError> {
        match self.success {
            Some(true) => {}
            Some(false) => {
                return Err(AnalysisError::Service {
                    code: None,
                    message: self
                        .error
                        .unwrap_or_else(|| "service reported failure".to_string()),
                });
            }
            None => {
                return Err(AnalysisError::Malformed("missing success flag".to_string()));
            }
        }

        let image = self
            .processed_image
            .ok_or_else(|| AnalysisError::Malformed("missing processed_image".to_string()))?;
        let (format, bytes) = parse_data_url(&image)?;

        let person_count = self
            .total_persons
            .ok_or_else(|| AnalysisError::Malformed("missing total_persons".to_string()))?;

        let server_rate = match self.fps {
            Some(rate) if !rate.is_finite() || rate < 0.0 => {
                return Err(AnalysisError::Malformed(format!("invalid fps {}", rate)));
            }
            rate => rate,
        };

        Ok(AnalysisResult {
            annotated: AnnotatedImage::new(bytes, format),
            person_count,
            server_rate,
        })
    }
}

pub fn to_data_url(format: ImageFormat, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes))
}

/// Splits a data URL (or bare base64, assumed JPEG) into format and bytes.
pub fn parse_data_url(value: &str) -> Result<(ImageFormat, Vec<u8>), AnalysisError> {
    let (format, payload) = match value.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| AnalysisError::Malformed("data URL without payload".to_string()))?;
            let mime = header.strip_suffix(";base64").ok_or_else(|| {
                AnalysisError::Malformed(format!("data URL is not base64: {}", header))
            })?;
            let format = ImageFormat::from_mime_type(mime).ok_or_else(|| {
                AnalysisError::Malformed(format!("unsupported image type {}", mime))
            })?;
            (format, payload)
        }
        None => (ImageFormat::Jpeg, value),
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| AnalysisError::Malformed(format!("invalid base64 image: {}", e)))?;

    if bytes.is_empty() {
        return Err(AnalysisError::Malformed("empty image".to_string()));
    }

    Ok((format, bytes))
}
