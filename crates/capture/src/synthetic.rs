//! Camera-less capture backend producing a moving test pattern.
//!
//! Used when no V4L2 device is available and by tests, which can script
//! acquisition failures and inspect the negotiated constraints.

use crate::{
    AcquireError, CaptureBackend, CaptureConstraints, DeviceInfo, Frame, LiveSource,
};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const PATTERN_FPS: u64 = 30;

pub struct SyntheticBackend {
    native: (u32, u32),
    devices: Vec<DeviceInfo>,
    failures: Mutex<VecDeque<AcquireError>>,
    attempts: Mutex<Vec<CaptureConstraints>>,
    last_source: Mutex<Option<Arc<SyntheticSource>>>,
}

impl SyntheticBackend {
    /// A backend whose single device natively produces `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            native: (width, height),
            devices: vec![DeviceInfo::new(0, Some("Synthetic test pattern".to_string()))],
            failures: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            last_source: Mutex::new(None),
        }
    }

    /// Queue errors returned by the next acquisitions, in order.
    pub fn with_failures(self, failures: impl IntoIterator<Item = AcquireError>) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(failures);
        self
    }

    pub fn without_devices(mut self) -> Self {
        self.devices.clear();
        self
    }

    /// Constraints of every acquisition attempt so far.
    pub fn attempts(&self) -> Vec<CaptureConstraints> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_source(&self) -> Option<Arc<SyntheticSource>> {
        self.last_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CaptureBackend for SyntheticBackend {
    fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn LiveSource>, AcquireError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*constraints);

        if self.devices.is_empty() {
            return Err(AcquireError::NotFound);
        }

        if let Some(failure) = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            return Err(failure);
        }

        let width = constraints.width.ideal.min(self.native.0);
        let height = constraints.height.ideal.min(self.native.1);
        if !constraints.admits(width, height) {
            return Err(AcquireError::Unsupported(format!("{}x{}", width, height)));
        }

        let source = Arc::new(SyntheticSource::new(width, height));
        *self
            .last_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&source));

        tracing::info!(width, height, "Synthetic source acquired");
        Ok(source)
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }
}

/// Gradient that scrolls one pixel per pattern frame.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    started_at: Instant,
    latest: Mutex<Frame>,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started_at: Instant::now(),
            latest: Mutex::new(Frame::new(render_pattern(width, height, 0), 0)),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// How many times `stop` was invoked, including repeated calls.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn pattern_index(&self) -> u64 {
        let frame_period = Duration::from_secs(1).as_nanos() as u64 / PATTERN_FPS;
        self.started_at.elapsed().as_nanos() as u64 / frame_period
    }
}

impl LiveSource for SyntheticSource {
    fn current_frame(&self) -> Frame {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if self.stopped.load(Ordering::SeqCst) {
            return latest.clone();
        }

        let index = self.pattern_index();
        if index != latest.sequence() {
            *latest = Frame::new(render_pattern(self.width, self.height, index), index);
        }
        latest.clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::info!("Synthetic source stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn render_pattern(width: u32, height: u32, offset: u64) -> RgbImage {
    let shift = (offset % u64::from(width.max(1))) as u32;
    RgbImage::from_fn(width, height, |x, y| {
        let sx = (x + shift) % width;
        image::Rgb([
            ((sx * 255) / width) as u8,
            ((y * 255) / height) as u8,
            (((sx + y) * 127) / (width + height)) as u8,
        ])
    })
}
