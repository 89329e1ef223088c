use std::path::PathBuf;

use crate::camera::controller::{CaptureDevice, CapturedStill, PermissionState};
use crate::camera::handle::mime_for_path;
use crate::common::{FaceAuthError, Result};

/// Serves an image file as if it came from a camera. Lets every flow run on
/// machines without a webcam.
pub struct StillImageDevice {
    path: PathBuf,
    mime: Option<&'static str>,
    ready: bool,
}

impl StillImageDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), mime: None, ready: false }
    }
}

impl CaptureDevice for StillImageDevice {
    fn describe(&self) -> String {
        format!("still image {}", self.path.display())
    }

    async fn request_permission(&mut self) -> PermissionState {
        match tokio::fs::File::open(&self.path).await {
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => PermissionState::Denied,
            _ => PermissionState::Granted,
        }
    }

    async fn open(&mut self) -> Result<()> {
        let mime = mime_for_path(&self.path).ok_or_else(|| {
            FaceAuthError::HardwareUnavailable(format!("Unsupported image type: {}", self.path.display()))
        })?;

        let path = self.path.clone();
        let (width, height) = tokio::task::spawn_blocking(move || image::image_dimensions(&path))
            .await
            .map_err(|e| FaceAuthError::HardwareUnavailable(e.to_string()))?
            .map_err(|e| {
                FaceAuthError::HardwareUnavailable(format!("Unreadable image {}: {}", self.path.display(), e))
            })?;

        tracing::debug!("Still image source {} is {}x{}", self.path.display(), width, height);
        self.mime = Some(mime);
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn acquire(&mut self) -> Result<CapturedStill> {
        let mime = self.mime.ok_or(FaceAuthError::CaptureNotReady)?;
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| FaceAuthError::CaptureFailed(format!("Failed to read {}: {}", self.path.display(), e)))?;
        Ok(CapturedStill { bytes, mime })
    }

    fn release(&mut self) {
        self.ready = false;
    }
}
