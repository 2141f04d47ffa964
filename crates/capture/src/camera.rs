//! V4L2 webcam backend.
//!
//! A dedicated capture thread owns the device and the mmap stream and keeps
//! the latest decoded frame in a shared slot, so `current_frame` never waits
//! on the driver.

use crate::decoder::{FrameDecoder, MjpegDecoder, YuyvDecoder};
use crate::device::{self, NegotiatedFormat, PixelFormat};
use crate::{AcquireError, CaptureBackend, CaptureConstraints, DeviceInfo, Frame, LiveSource};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use v4l::{
    buffer::Type,
    io::{mmap::Stream, traits::CaptureStream},
};

const BUFFER_COUNT: u32 = 4;

/// Frames queued before the stream started are stale
const FLUSH_FRAME_COUNT: usize = 4;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest wait for a buffer before the capture loop rechecks the stop flag
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Consecutive capture errors after which the thread gives up on the device
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

pub struct V4l2Backend {
    device_id: u32,
}

impl V4l2Backend {
    pub fn new(device_id: u32) -> Self {
        Self { device_id }
    }
}

impl CaptureBackend for V4l2Backend {
    fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn LiveSource>, AcquireError> {
        tracing::info!("Acquiring camera /dev/video{}", self.device_id);

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let device_id = self.device_id;
        let constraints = *constraints;
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("capture-video{}", device_id))
            .spawn(move || capture_thread(device_id, constraints, thread_stop, ready_tx))
            .map_err(|e| AcquireError::Other(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok((latest, format))) => Ok(Arc::new(V4l2Source {
                format,
                latest,
                stop,
                handle: Mutex::new(Some(handle)),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                stop.store(true, Ordering::SeqCst);
                tracing::error!("Camera produced no frame within {:?}", READY_TIMEOUT);
                // Release the device before a retry opens it again.
                let _ = handle.join();
                Err(AcquireError::Timeout(READY_TIMEOUT))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(AcquireError::Other("capture thread exited".to_string()))
            }
        }
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        device::list_devices()
    }
}

type Ready = Result<(Arc<Mutex<Frame>>, NegotiatedFormat), AcquireError>;

fn capture_thread(
    device_id: u32,
    constraints: CaptureConstraints,
    stop: Arc<AtomicBool>,
    ready: SyncSender<Ready>,
) {
    let opened = device::open_device(device_id).and_then(|device| {
        let format = device::negotiate(&device, &constraints)?;
        Ok((device, format))
    });
    let (device, format) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut decoder: Box<dyn FrameDecoder> = match format.pixel_format {
        PixelFormat::Yuyv => Box::new(YuyvDecoder),
        PixelFormat::Mjpeg => match MjpegDecoder::try_new() {
            Ok(decoder) => Box::new(decoder),
            Err(e) => {
                let _ = ready.send(Err(AcquireError::Other(e.to_string())));
                return;
            }
        },
    };

    let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    stream.set_timeout(POLL_TIMEOUT);

    let flushed = (0..FLUSH_FRAME_COUNT)
        .take_while(|_| stream.next().is_ok())
        .count();
    tracing::debug!("Flushed {} stale frames", flushed);

    let mut latest: Option<Arc<Mutex<Frame>>> = None;
    let mut sequence = 0u64;
    let mut consecutive_errors = 0u32;
    let mut dropped_frames = 0u64;
    let mut stalls = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let decoded = match stream.next() {
            Ok((buf, _meta)) => decoder.decode(buf, format.width, format.height, sequence),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                stalls += 1;
                if stalls.is_multiple_of(20) {
                    tracing::warn!("No frame from camera for {:?}", POLL_TIMEOUT * 20);
                }
                continue;
            }
            Err(e) => Err(e.into()),
        };

        match decoded {
            Ok(frame) => {
                consecutive_errors = 0;
                stalls = 0;
                sequence += 1;
                match &latest {
                    Some(slot) => *slot.lock().unwrap_or_else(PoisonError::into_inner) = frame,
                    None => {
                        let slot = Arc::new(Mutex::new(frame));
                        if ready.send(Ok((Arc::clone(&slot), format))).is_err() {
                            // acquire() timed out and went away
                            return;
                        }
                        latest = Some(slot);
                    }
                }

                if sequence.is_multiple_of(300) {
                    tracing::debug!(
                        "Status: [Frames: {}] [Dropped: {}]",
                        sequence,
                        dropped_frames
                    );
                }
            }
            Err(e) => {
                dropped_frames += 1;
                consecutive_errors += 1;
                tracing::warn!("Frame #{} capture error: {}", sequence, e);

                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    tracing::error!(
                        "Giving up on camera after {} consecutive errors",
                        consecutive_errors
                    );
                    if latest.is_none() {
                        let _ = ready.send(Err(AcquireError::Other(e.to_string())));
                    }
                    return;
                }
            }
        }
    }

    tracing::info!(
        "Capture stopped: {} frames captured, {} dropped",
        sequence,
        dropped_frames
    );
}

pub struct V4l2Source {
    format: NegotiatedFormat,
    latest: Arc<Mutex<Frame>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSource for V4l2Source {
    fn current_frame(&self) -> Frame {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.format.width, self.format.height)
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
            tracing::info!("Camera released");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.stop();
    }
}
