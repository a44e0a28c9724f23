//! mirror-hw — Camera capture for the Emotion Practice game.
//!
//! Provides V4L2-based camera access, conversion of the negotiated pixel
//! format to packed RGB, and a background feed that always holds the most
//! recent frame.

pub mod camera;
pub mod feed;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureSession, DeviceInfo, PixelFormat};
pub use feed::{CameraFeed, FrameSource};
pub use frame::{Frame, FrameError};
