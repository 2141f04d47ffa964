use crate::cache::CachedResult;
use crate::client::AnnotatedImage;
use crate::session::Session;
use crate::status::{DisplayMetrics, StatusSink};
use crate::surface::{Drawn, SharedSurface, stretch};
use capture::LiveSource;
use fast_image_resize::Resizer;
use image::RgbImage;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendered {
    Inactive,
    Annotated { sequence: u64 },
    Live { sequence: u64 },
}

/// Decoded pixels of the annotated image currently cached, plus the same
/// pixels stretched to the surface size they were last drawn at.
struct Decoded {
    source: AnnotatedImage,
    pixels: RgbImage,
    scaled: Option<RgbImage>,
}

/// Consumer side of the pipeline: renders the cached annotated frame, or
/// the live frame until one exists, on every display tick.
pub struct DisplayLoop {
    session: Arc<Session>,
    source: Arc<dyn LiveSource>,
    surface: SharedSurface,
    status: Arc<dyn StatusSink>,
    decoded: Option<Decoded>,
    rejected: Option<AnnotatedImage>,
    resizer: Resizer,
    decodes: u64,
    scales: u64,
    ticks: u64,
}

impl DisplayLoop {
    pub fn new(
        session: Arc<Session>,
        source: Arc<dyn LiveSource>,
        surface: SharedSurface,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            session,
            source,
            surface,
            status,
            decoded: None,
            rejected: None,
            resizer: Resizer::new(),
            decodes: 0,
            scales: 0,
            ticks: 0,
        }
    }

    /// Number of annotated images decoded so far.
    pub fn decode_count(&self) -> u64 {
        self.decodes
    }

    /// Number of times an annotated image was scaled to the surface.
    pub fn scale_count(&self) -> u64 {
        self.scales
    }

    pub fn tick(&mut self) -> Rendered {
        if !self.session.is_active() {
            return Rendered::Inactive;
        }
        self.ticks += 1;

        let cached = self.session.cache().latest();
        self.status.on_metrics(&metrics_for(cached.as_ref()));

        let rendered = match cached.as_ref().and_then(|c| self.annotated_pixels(c)) {
            Some(sequence) => Rendered::Annotated { sequence },
            None => self.draw_live(),
        };

        if self.ticks.is_multiple_of(300) {
            tracing::debug!(ticks = self.ticks, decodes = self.decodes, ?rendered, "Display loop");
        }
        rendered
    }

    pub async fn run(mut self, period: Duration) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if self.tick() == Rendered::Inactive {
                break;
            }
        }
        tracing::debug!(ticks = self.ticks, "Display loop finished");
    }

    /// Draws the cached annotated image, decoding it only when its bytes
    /// changed and rescaling it only when they or the surface size changed. Returns `None` if it cannot be shown.
    fn annotated_pixels(&mut self, cached: &CachedResult) -> Option<u64> {
        let annotated = &cached.result.annotated;

        let reusable = self
            .decoded
            .as_ref()
            .is_some_and(|d| d.source.same_payload(annotated));
        if !reusable {
            if self
                .rejected
                .as_ref()
                .is_some_and(|r| r.same_payload(annotated))
            {
                return None;
            }

            self.decodes += 1;
            match image::load_from_memory_with_format(annotated.bytes(), image::ImageFormat::Jpeg)
            {
                Ok(img) => {
                    self.decoded = Some(Decoded {
                        source: annotated.clone(),
                        pixels: img.to_rgb8(),
                        scaled: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, sequence = cached.sequence, "Annotated image could not be decoded");
                    self.rejected = Some(annotated.clone());
                    return None;
                }
            }
        }

        let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        let (width, height) = surface.size();
        let decoded = self.decoded.as_mut()?;
        if decoded
            .scaled
            .as_ref()
            .is_none_or(|scaled| scaled.dimensions() != (width, height))
        {
            match stretch(&mut self.resizer, &decoded.pixels, width, height) {
                Ok(scaled) => {
                    decoded.scaled = Some(scaled);
                    self.scales += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to scale annotated frame");
                    return None;
                }
            }
        }

        let scaled = decoded.scaled.as_ref()?;
        match surface.draw(
            scaled,
            Drawn::Annotated {
                sequence: cached.sequence,
            },
        ) {
            Ok(()) => Some(cached.sequence),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to draw annotated frame");
                None
            }
        }
    }

    fn draw_live(&mut self) -> Rendered {
        let frame = self.source.current_frame();
        let sequence = frame.sequence();

        let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = surface.draw(frame.image(), Drawn::Live { sequence }) {
            tracing::warn!(error = %e, "Failed to draw live frame");
        }
        Rendered::Live { sequence }
    }
}

fn metrics_for(cached: Option<&CachedResult>) -> DisplayMetrics {
    match cached {
        Some(cached) => DisplayMetrics {
            fps: cached.result.server_rate.filter(|rate| *rate > 0.0),
            person_count: Some(cached.result.person_count),
        },
        None => DisplayMetrics::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AnalysisResult;
    use crate::encoder::ImageFormat;
    use crate::status::StatusBoard;
    use crate::surface::FrameSurface;
    use capture::SyntheticSource;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn jpeg(width: u32, height: u32, value: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([value, value, value]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn result(bytes: Vec<u8>, persons: u32, rate: Option<f64>) -> AnalysisResult {
        AnalysisResult {
            annotated: AnnotatedImage::new(bytes, ImageFormat::Jpeg),
            person_count: persons,
            server_rate: rate,
        }
    }

    struct Fixture {
        session: Arc<Session>,
        surface: SharedSurface,
        board: Arc<StatusBoard>,
        display: DisplayLoop,
    }

    fn fixture() -> Fixture {
        let session = Arc::new(Session::new(1));
        let source = Arc::new(SyntheticSource::new(64, 48));
        let surface = FrameSurface::shared();
        surface.lock().unwrap().resize(64, 48);
        let board = Arc::new(StatusBoard::new());
        let display = DisplayLoop::new(
            Arc::clone(&session),
            source,
            Arc::clone(&surface),
            board.clone(),
        );
        Fixture {
            session,
            surface,
            board,
            display,
        }
    }

    #[test]
    fn live_frame_is_drawn_before_first_result() {
        let mut f = fixture();
        assert!(matches!(f.display.tick(), Rendered::Live { .. }));

        let surface = f.surface.lock().unwrap();
        assert!(!surface.is_blank());
        assert!(matches!(surface.last_drawn(), Some(Drawn::Live { .. })));
    }

    #[test]
    fn cached_result_replaces_live_frame() {
        let mut f = fixture();
        f.session
            .cache()
            .store(1, result(jpeg(32, 24, 120), 2, Some(9.5)));

        assert_eq!(f.display.tick(), Rendered::Annotated { sequence: 1 });
        let snapshot = f.board.snapshot();
        assert_eq!(snapshot.persons, 2);
        assert_eq!(snapshot.fps, 9.5);

        let surface = f.surface.lock().unwrap();
        assert_eq!(surface.pixels().unwrap().dimensions(), (64, 48));
    }

    #[test]
    fn unchanged_bytes_are_decoded_once() {
        let mut f = fixture();
        let bytes = jpeg(16, 16, 10);
        f.session.cache().store(1, result(bytes.clone(), 0, None));

        for _ in 0..5 {
            f.display.tick();
        }
        assert_eq!(f.display.decode_count(), 1);

        f.session.cache().store(2, result(jpeg(16, 16, 250), 0, None));
        f.display.tick();
        assert_eq!(f.display.decode_count(), 2);
    }

    #[test]
    fn scaled_canvas_is_reused_until_surface_resizes() {
        let mut f = fixture();
        f.session.cache().store(1, result(jpeg(32, 24, 90), 0, None));

        for _ in 0..4 {
            assert_eq!(f.display.tick(), Rendered::Annotated { sequence: 1 });
        }
        assert_eq!(f.display.scale_count(), 1);

        f.surface.lock().unwrap().resize(128, 96);
        assert_eq!(f.display.tick(), Rendered::Annotated { sequence: 1 });
        assert_eq!(f.display.scale_count(), 2);
        assert_eq!(f.display.decode_count(), 1);
        assert_eq!(
            f.surface.lock().unwrap().pixels().unwrap().dimensions(),
            (128, 96)
        );
    }

    /// Records what the surface showed when metrics arrived.
    struct SurfaceRecorder {
        surface: SharedSurface,
        seen: Mutex<Vec<(Option<Drawn>, Option<u32>)>>,
    }

    impl StatusSink for SurfaceRecorder {
        fn on_status(&self, _token: crate::status::StatusToken, _message: Option<&str>) {}

        fn on_metrics(&self, metrics: &DisplayMetrics) {
            let drawn = self.surface.lock().unwrap().last_drawn();
            self.seen.lock().unwrap().push((drawn, metrics.person_count));
        }

        fn on_alert(&self, _message: &str) {}
    }

    #[test]
    fn metrics_are_reported_before_the_frame_they_belong_to() {
        let session = Arc::new(Session::new(1));
        let surface = FrameSurface::shared();
        surface.lock().unwrap().resize(64, 48);
        let recorder = Arc::new(SurfaceRecorder {
            surface: Arc::clone(&surface),
            seen: Mutex::new(Vec::new()),
        });
        let mut display = DisplayLoop::new(
            Arc::clone(&session),
            Arc::new(SyntheticSource::new(64, 48)),
            Arc::clone(&surface),
            recorder.clone(),
        );

        session.cache().store(1, result(jpeg(16, 16, 40), 3, Some(7.0)));
        assert_eq!(display.tick(), Rendered::Annotated { sequence: 1 });

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(None, Some(3))]);
    }

    #[test]
    fn undecodable_result_falls_back_to_live() {
        let mut f = fixture();
        f.session
            .cache()
            .store(1, result(vec![0xde, 0xad], 1, None));

        assert!(matches!(f.display.tick(), Rendered::Live { .. }));
        assert!(matches!(f.display.tick(), Rendered::Live { .. }));
        assert_eq!(f.display.decode_count(), 1);
    }

    #[test]
    fn zero_or_missing_rate_keeps_previous_fps() {
        let mut f = fixture();
        f.session.cache().store(1, result(jpeg(8, 8, 0), 1, Some(4.0)));
        f.display.tick();
        f.session.cache().store(2, result(jpeg(8, 8, 0), 1, Some(0.0)));
        f.display.tick();
        f.session.cache().store(3, result(jpeg(8, 8, 0), 1, None));
        f.display.tick();

        assert_eq!(f.board.snapshot().fps, 4.0);
    }

    #[test]
    fn stopped_session_renders_nothing() {
        let mut f = fixture();
        f.session.deactivate();
        assert_eq!(f.display.tick(), Rendered::Inactive);
        assert!(f.surface.lock().unwrap().is_blank());
    }
}
