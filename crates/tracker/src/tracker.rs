use crate::client::AnalysisClient;
use crate::config::PipelineConfig;
use crate::dispatch::{DispatchMetrics, Dispatcher};
use crate::display::DisplayLoop;
use crate::encoder::FrameEncoder;
use crate::session::Session;
use crate::status::{self, DisplayMetrics, StatusSink, StatusToken, acquisition_message};
use crate::surface::SharedSurface;
use capture::{
    AcquireError, Acquired, CaptureBackend, CaptureConstraints, ConstraintTier, DeviceInfo,
    LiveSource, acquire_with_fallback,
};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { tier: ConstraintTier },
    AlreadyRunning,
}

#[derive(Error, Debug)]
#[error("{message}")]
pub struct StartError {
    pub message: &'static str,
    #[source]
    pub cause: AcquireError,
}

struct ActiveSession {
    session: Arc<Session>,
    source: Arc<dyn LiveSource>,
    loops: Vec<JoinHandle<()>>,
}

/// Owns the session lifecycle: acquires the capture source, runs the
/// dispatch and display loops, and tears both down on stop.
pub struct Tracker {
    backend: Arc<dyn CaptureBackend>,
    client: Arc<dyn AnalysisClient>,
    status: Arc<dyn StatusSink>,
    surface: SharedSurface,
    pipeline: PipelineConfig,
    metrics: DispatchMetrics,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    state: Mutex<LifecycleState>,
}

impl Tracker {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        client: Arc<dyn AnalysisClient>,
        status: Arc<dyn StatusSink>,
        surface: SharedSurface,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            backend,
            client,
            status,
            surface,
            pipeline,
            metrics: DispatchMetrics::new("tracker"),
            active: tokio::sync::Mutex::new(None),
            state: Mutex::new(LifecycleState::Stopped),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.backend.devices()
    }

    /// The running session, if any.
    pub async fn session(&self) -> Option<Arc<Session>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| Arc::clone(&a.session))
    }

    /// Outstanding requests of the running session; zero when stopped.
    pub async fn in_flight(&self) -> usize {
        self.session().await.map_or(0, |s| s.in_flight())
    }

    /// Starts a session. A second start while one runs is a no-op.
    pub async fn start(&self) -> Result<StartOutcome, StartError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            tracing::info!("Start requested while a session is running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.set_state(LifecycleState::Starting);
        self.status
            .on_status(StatusToken::Starting, Some(status::REQUESTING_ACCESS));
        self.status.on_metrics(&DisplayMetrics::zero());

        let Acquired { source, tier } = match self.acquire().await {
            Ok(acquired) => acquired,
            Err(cause) => {
                let message = acquisition_message(&cause);
                self.status.on_status(StatusToken::Error, Some(message));
                self.status.on_alert(message);
                self.set_state(LifecycleState::Stopped);
                return Err(StartError { message, cause });
            }
        };

        let (width, height) = source.dimensions();
        {
            let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
            surface.resize(width, height);
            surface.clear();
        }

        let session = Arc::new(Session::new(self.pipeline.max_in_flight));
        let period = self.pipeline.tick_period();

        self.status.on_status(
            StatusToken::Active,
            Some(match tier {
                ConstraintTier::Preferred => status::DETECTION_ACTIVE,
                ConstraintTier::Fallback => status::DETECTION_ACTIVE_BASIC,
            }),
        );

        let mut display = DisplayLoop::new(
            Arc::clone(&session),
            Arc::clone(&source),
            Arc::clone(&self.surface),
            Arc::clone(&self.status),
        );
        // The surface holds a frame before the session is reported running.
        display.tick();

        let dispatcher = Dispatcher::new(
            Arc::clone(&session),
            Arc::clone(&source),
            Arc::clone(&self.client),
            FrameEncoder::from_config(&self.pipeline),
            Arc::clone(&self.status),
            self.metrics.clone(),
        );

        let loops = vec![
            tokio::spawn(display.run(period)),
            tokio::spawn(dispatcher.run(period)),
        ];

        *active = Some(ActiveSession {
            session,
            source,
            loops,
        });
        self.set_state(LifecycleState::Running);

        tracing::info!(
            width,
            height,
            ?tier,
            bound = self.pipeline.max_in_flight,
            display_fps = self.pipeline.display_fps,
            "Tracking session started"
        );
        Ok(StartOutcome::Started { tier })
    }

    async fn acquire(&self) -> Result<Acquired, AcquireError> {
        let backend = Arc::clone(&self.backend);
        let sink = Arc::clone(&self.status);

        tokio::task::spawn_blocking(move || {
            acquire_with_fallback(
                backend.as_ref(),
                &CaptureConstraints::PREFERRED,
                &CaptureConstraints::FALLBACK,
                |_| sink.on_status(StatusToken::Starting, Some(status::RETRYING_BASIC)),
            )
        })
        .await
        .map_err(|e| AcquireError::Other(format!("acquisition task failed: {}", e)))?
    }

    /// Stops the running session. Returns `false` if none was running.
    ///
    /// Outstanding analysis requests are left to finish; their results are
    /// discarded.
    pub async fn stop(&self) -> bool {
        let mut active = self.active.lock().await;
        let Some(ActiveSession {
            session,
            source,
            loops,
        }) = active.take()
        else {
            tracing::debug!("Stop requested with no running session");
            return false;
        };

        session.deactivate();
        for handle in loops {
            handle.abort();
            let _ = handle.await;
        }

        // Joining the capture thread may wait on the driver.
        if let Err(e) = tokio::task::spawn_blocking(move || source.stop()).await {
            tracing::error!(error = %e, "Camera release task failed");
        }
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        self.status
            .on_status(StatusToken::Stopped, Some(status::DETECTION_STOPPED));
        self.status.on_metrics(&DisplayMetrics::zero());
        self.set_state(LifecycleState::Stopped);

        tracing::info!(
            uptime_secs = session.uptime().as_secs_f64(),
            issued = session.issued(),
            outstanding = session.in_flight(),
            "Tracking session stopped"
        );
        true
    }
}
