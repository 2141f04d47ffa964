use crate::{AcquireError, CaptureConstraints, Frame};
use serde::Serialize;
use std::sync::Arc;

/// A running capture source.
///
/// `current_frame` never blocks and never fails once the source is acquired:
/// it hands out the most recent buffered frame.
pub trait LiveSource: Send + Sync {
    fn current_frame(&self) -> Frame;

    /// Intrinsic (negotiated) frame size.
    fn dimensions(&self) -> (u32, u32);

    /// Releases the device. Idempotent.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Opens live sources against a set of constraints.
pub trait CaptureBackend: Send + Sync {
    /// Blocks until the source delivered its first frame.
    fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn LiveSource>, AcquireError>;

    fn devices(&self) -> Vec<DeviceInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: u32,
    pub label: String,
}

impl DeviceInfo {
    pub fn new(index: u32, label: Option<String>) -> Self {
        let label = label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "Unknown Camera".to_string());
        Self { index, label }
    }
}
