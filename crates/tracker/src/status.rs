use capture::AcquireError;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

pub const REQUESTING_ACCESS: &str = "Requesting camera access...";
pub const RETRYING_BASIC: &str = "Camera settings not supported. Trying with basic settings...";
pub const DETECTION_ACTIVE: &str = "AI detection active";
pub const DETECTION_ACTIVE_BASIC: &str = "AI detection active (basic mode)";
pub const PROCESSING_ERROR: &str = "Processing error occurred";
pub const CONNECTION_ERROR: &str = "Connection error - check server";
pub const DETECTION_STOPPED: &str = "Detection stopped";
pub const NO_CAMERA_DETECTED: &str =
    "No camera detected. Please connect a camera and refresh the page.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusToken {
    Starting,
    Active,
    Detecting,
    Stopped,
    Error,
    Offline,
}

/// User-facing explanation of a terminal acquisition failure.
pub fn acquisition_message(error: &AcquireError) -> &'static str {
    match error {
        AcquireError::Denied => {
            "Camera permission denied. Please allow camera access and try again."
        }
        AcquireError::NotFound => "No camera found. Please connect a camera and try again.",
        AcquireError::Busy => "Camera is being used by another application.",
        AcquireError::Unsupported(_) => "Camera settings not supported by this device.",
        AcquireError::Timeout(_) | AcquireError::Other(_) => "Camera access failed",
    }
}

/// Metrics derived on a display tick. `None` leaves the shown value as is.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DisplayMetrics {
    pub fps: Option<f64>,
    pub person_count: Option<u32>,
}

impl DisplayMetrics {
    pub fn zero() -> Self {
        Self {
            fps: Some(0.0),
            person_count: Some(0),
        }
    }
}

/// Receives state transitions and metrics from the pipeline.
pub trait StatusSink: Send + Sync {
    /// `message: None` keeps the current message text.
    fn on_status(&self, token: StatusToken, message: Option<&str>);

    fn on_metrics(&self, metrics: &DisplayMetrics);

    fn on_alert(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub message: String,
    pub status: StatusToken,
    pub fps: f64,
    pub persons: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            message: "Ready".to_string(),
            status: StatusToken::Stopped,
            fps: 0.0,
            persons: 0,
            alert: None,
        }
    }
}

/// In-memory [`StatusSink`] keeping the latest values for readers such as
/// the viewer server.
#[derive(Debug, Default)]
pub struct StatusBoard {
    state: Mutex<StatusSnapshot>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatusSink for StatusBoard {
    fn on_status(&self, token: StatusToken, message: Option<&str>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let message_changed = message.is_some_and(|m| m != state.message);
        if state.status != token || message_changed {
            tracing::info!(
                from = ?state.status,
                to = ?token,
                message = message.unwrap_or(&state.message),
                "Status changed"
            );
        }

        state.status = token;
        if let Some(message) = message {
            state.message = message.to_string();
        }
    }

    fn on_metrics(&self, metrics: &DisplayMetrics) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fps) = metrics.fps {
            state.fps = fps;
        }
        if let Some(persons) = metrics.person_count {
            state.persons = persons;
        }
    }

    fn on_alert(&self, message: &str) {
        tracing::warn!(message, "Alert raised");
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .alert = Some(message.to_string());
    }
}
