pub mod controller;
pub mod handle;
pub mod still;
pub mod v4l2;

pub use controller::{CaptureController, CaptureDevice, CaptureSession, CaptureSpool, CapturedStill, PermissionState};
pub use handle::{ImageHandle, Release};
pub use still::StillImageDevice;
pub use v4l2::{CameraInfo, V4lCamera};
