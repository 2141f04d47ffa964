pub mod acquire;
#[cfg(feature = "v4l2")]
pub mod camera;
pub mod constraints;
pub mod decoder;
#[cfg(feature = "v4l2")]
pub mod device;
pub mod errors;
pub mod frame;
pub mod source;
pub mod synthetic;

pub use acquire::{Acquired, acquire_with_fallback};
#[cfg(feature = "v4l2")]
pub use camera::V4l2Backend;
pub use constraints::{CaptureConstraints, ConstraintTier, Preference};
pub use decoder::{FrameDecoder, YuyvDecoder};
pub use errors::AcquireError;
pub use frame::Frame;
pub use source::{CaptureBackend, DeviceInfo, LiveSource};
pub use synthetic::{SyntheticBackend, SyntheticSource};
