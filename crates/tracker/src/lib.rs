pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod display;
pub mod encoder;
pub mod session;
pub mod status;
pub mod surface;
pub mod tracker;
pub mod viewer;
pub mod wire;

pub use cache::{CachedResult, ResultCache, StoreOutcome};
pub use client::{AnalysisClient, AnalysisError, AnalysisResult, AnnotatedImage, HttpAnalysisClient};
pub use config::{CaptureBackendKind, PipelineConfig, TrackerConfig};
pub use dispatch::{DispatchMetrics, DispatchTick, Dispatcher};
pub use display::{DisplayLoop, Rendered};
pub use encoder::{EncodedFrame, FrameEncoder, ImageFormat};
pub use session::{InFlightPermit, Session};
pub use status::{DisplayMetrics, StatusBoard, StatusSink, StatusSnapshot, StatusToken};
pub use surface::{Drawn, FrameSurface, RenderSurface, SharedSurface, fit_within};
pub use tracker::{LifecycleState, StartError, StartOutcome, Tracker};
