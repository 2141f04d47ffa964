use crate::status::{StatusBoard, StatusSnapshot};
use crate::tracker::{StartOutcome, Tracker};
use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message, ws::WebSocket},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use capture::ConstraintTier;
use image::ExtendedColorType;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use serde_json::json;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tower_http::cors::CorsLayer;

const VIEWER_JPEG_QUALITY: u8 = 80;

#[derive(Clone)]
pub struct ViewerState {
    tracker: Arc<Tracker>,
    board: Arc<StatusBoard>,
    tx: broadcast::Sender<Arc<Vec<u8>>>,
}

impl ViewerState {
    pub fn new(tracker: Arc<Tracker>, board: Arc<StatusBoard>) -> Self {
        let (tx, _) = broadcast::channel(10);
        Self { tracker, board, tx }
    }
}

pub fn router(state: ViewerState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/status", get(status_handler))
        .route("/cameras", get(cameras_handler))
        .route("/session/start", post(start_handler))
        .route("/session/stop", post(stop_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(addr: &str, fps: u32, state: ViewerState) -> anyhow::Result<()> {
    tokio::spawn(publish(state.clone(), fps));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Viewer server listening on {}", addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Streams the render surface to subscribed WebSocket clients.
async fn publish(state: ViewerState, fps: u32) {
    let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if state.tx.receiver_count() == 0 {
            continue;
        }

        let pixels = state
            .tracker
            .surface()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pixels()
            .cloned();
        let snapshot = state.board.snapshot();

        let packet = match tokio::task::spawn_blocking(move || build_packet(&snapshot, pixels.as_ref())).await {
            Ok(Ok(packet)) => packet,
            Ok(Err(e)) => {
                tracing::error!("Viewer packet error: {}", e);
                continue;
            }
            Err(e) => {
                tracing::error!("Viewer packet task failed: {}", e);
                continue;
            }
        };

        let _ = state.tx.send(Arc::new(packet));
    }
}

/// `[u32 LE json length][status json][jpeg]`; the JPEG section is empty for
/// a blank surface.
pub fn build_packet(
    snapshot: &StatusSnapshot,
    pixels: Option<&RgbImage>,
) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_vec(snapshot)?;

    let mut jpeg = Vec::new();
    if let Some(pixels) = pixels {
        JpegEncoder::new_with_quality(&mut jpeg, VIEWER_JPEG_QUALITY).encode(
            pixels.as_raw(),
            pixels.width(),
            pixels.height(),
            ExtendedColorType::Rgb8,
        )?;
    }

    let mut packet = Vec::with_capacity(4 + json.len() + jpeg.len());
    packet.extend_from_slice(&(json.len() as u32).to_le_bytes());
    packet.extend_from_slice(&json);
    packet.extend_from_slice(&jpeg);
    Ok(packet)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ViewerState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ViewerState) {
    tracing::info!("New WebSocket connection established");

    let mut rx = state.tx.subscribe();

    loop {
        let packet = match rx.recv().await {
            Ok(packet) => packet,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "WebSocket client lagging, skipping packets");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if socket
            .send(Message::Binary(packet.as_ref().clone()))
            .await
            .is_err()
        {
            tracing::info!("WebSocket client disconnected");
            break;
        }
    }
}

async fn status_handler(State(state): State<ViewerState>) -> Json<StatusSnapshot> {
    Json(state.board.snapshot())
}

async fn cameras_handler(State(state): State<ViewerState>) -> impl IntoResponse {
    Json(state.tracker.devices())
}

async fn start_handler(State(state): State<ViewerState>) -> impl IntoResponse {
    match state.tracker.start().await {
        Ok(StartOutcome::Started { tier }) => {
            let tier = match tier {
                ConstraintTier::Preferred => "preferred",
                ConstraintTier::Fallback => "fallback",
            };
            (
                StatusCode::OK,
                Json(json!({ "result": "started", "tier": tier })),
            )
        }
        Ok(StartOutcome::AlreadyRunning) => {
            (StatusCode::OK, Json(json!({ "result": "already_running" })))
        }
        Err(e) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": e.message, "cause": e.cause.to_string() })),
        ),
    }
}

async fn stop_handler(State(state): State<ViewerState>) -> impl IntoResponse {
    let result = if state.tracker.stop().await {
        "stopped"
    } else {
        "not_running"
    };
    Json(json!({ "result": result }))
}
