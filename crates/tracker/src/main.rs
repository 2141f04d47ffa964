use anyhow::Context;
use capture::{CaptureBackend, SyntheticBackend};
use common::{TelemetryGuard, setup_logging};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracker::config::{CaptureBackendKind, TrackerConfig};
use tracker::status::{self, StatusBoard, StatusSink, StatusToken};
use tracker::surface::FrameSurface;
use tracker::tracker::Tracker;
use tracker::viewer::{self, ViewerState};
use tracker::HttpAnalysisClient;

const SERVICE_NAME: &str = "tracker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TrackerConfig::from_env()?;

    let _telemetry = match &config.otel_endpoint {
        Some(endpoint) => Some(
            TelemetryGuard::init(SERVICE_NAME, endpoint, config.environment)
                .context("Failed to initialize OTLP telemetry")?,
        ),
        None => {
            setup_logging(config.environment);
            None
        }
    };

    tracing::info!(
        environment = config.environment.as_str(),
        analysis_url = %config.analysis_url,
        backend = ?config.capture_backend,
        "Tracker starting"
    );

    let backend = build_backend(&config)?;
    let client = HttpAnalysisClient::new(config.analysis_url.clone(), config.analysis_timeout)
        .context("Failed to build analysis HTTP client")?;
    let board = Arc::new(StatusBoard::new());

    let tracker = Arc::new(Tracker::new(
        backend,
        Arc::new(client),
        board.clone(),
        FrameSurface::shared(),
        config.pipeline.clone(),
    ));

    let devices = tracker.devices();
    tracing::info!(count = devices.len(), "Capture devices found");
    if devices.is_empty() {
        board.on_status(StatusToken::Stopped, Some(status::NO_CAMERA_DETECTED));
    } else if config.auto_start
        && let Err(e) = tracker.start().await
    {
        tracing::error!(error = %e, cause = %e.cause, "Failed to start tracking session");
    }

    let state = ViewerState::new(Arc::clone(&tracker), board);
    let viewer_addr = config.viewer_addr.clone();
    let viewer_fps = config.viewer_fps;
    let server = tokio::spawn(async move {
        if let Err(e) = viewer::run_server(&viewer_addr, viewer_fps, state).await {
            tracing::error!("Viewer server error: {}", e);
        }
    });

    shutdown_signal().await?;
    tracing::info!("Shutdown signal received");

    tracker.stop().await;
    server.abort();

    tracing::info!("Tracker stopped gracefully");
    Ok(())
}

fn build_backend(config: &TrackerConfig) -> anyhow::Result<Arc<dyn CaptureBackend>> {
    match config.capture_backend {
        CaptureBackendKind::Synthetic => Ok(Arc::new(SyntheticBackend::new(1280, 720))),
        #[cfg(feature = "v4l2")]
        CaptureBackendKind::V4l2 => Ok(Arc::new(capture::V4l2Backend::new(config.device_id))),
        #[cfg(not(feature = "v4l2"))]
        CaptureBackendKind::V4l2 => {
            anyhow::bail!("CAPTURE_BACKEND=v4l2 requires building with the `v4l2` feature")
        }
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
