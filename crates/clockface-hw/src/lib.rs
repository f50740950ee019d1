//! clockface-hw: Camera acquisition and frame handling.
//!
//! Provides the `CameraSource`/`VideoStream` seam the capture session owns,
//! a V4L2-backed implementation, and RGBA frame utilities.

pub mod camera;
pub mod frame;

pub use camera::{CameraConstraints, CameraError, CameraSource, FacingMode, V4lCamera, VideoStream};
pub use frame::{Frame, FrameError, CANONICAL_HEIGHT, CANONICAL_WIDTH};
