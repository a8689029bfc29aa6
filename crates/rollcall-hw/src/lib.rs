//! rollcall-hw: webcam capture for attendance.
//!
//! V4L2 capture negotiated to a raw or MJPG format and converted to RGB24
//! frames, plus JPEG snapshots of the frame an attendance event was taken from.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
