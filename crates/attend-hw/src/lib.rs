//! attend-hw: V4L2 camera capture producing RGB frames for the session.

pub mod camera;
pub mod convert;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
