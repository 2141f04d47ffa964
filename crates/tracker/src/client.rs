use crate::encoder::{EncodedFrame, ImageFormat};
use crate::wire::{AnalysisRequest, AnalysisResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Opaque annotated image as returned by the service, still encoded.
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
    bytes: Arc<[u8]>,
    format: ImageFormat,
}

impl AnnotatedImage {
    pub fn new(bytes: Vec<u8>, format: ImageFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// True when both handles hold the same encoded payload.
    pub fn same_payload(&self, other: &AnnotatedImage) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes) || self.bytes == other.bytes
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub annotated: AnnotatedImage,
    pub person_count: u32,
    /// Frames per second measured by the service, if it reported one.
    pub server_rate: Option<f64>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Connection-level failure: unreachable, refused, timed out, interrupted.
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered but reported failure.
    #[error("Service error{}: {message}", .code.map(|c| format!(" (HTTP {})", c)).unwrap_or_default())]
    Service { code: Option<u16>, message: String },

    /// The answer could not be turned into an [`AnalysisResult`].
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl AnalysisError {
    /// Label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Network(_) => "network",
            AnalysisError::Service { .. } => "service",
            AnalysisError::Malformed(_) => "malformed",
        }
    }
}

/// Sends one encoded frame for remote analysis.
///
/// Implementations never retry; the dispatch loop owns that policy.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn submit(&self, frame: EncodedFrame) -> Result<AnalysisResult, AnalysisError>;
}

pub struct HttpAnalysisClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAnalysisClient {
    /// `timeout` bounds a whole request; `None` leaves it to the transport.
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn submit(&self, frame: EncodedFrame) -> Result<AnalysisResult, AnalysisError> {
        let request = AnalysisRequest::from_frame(&frame);

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Service {
                code: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let parsed: AnalysisResponse = serde_json::from_slice(&body)
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

        parsed.into_result()
    }
}
