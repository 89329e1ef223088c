use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::camera::handle::{extension_for_mime, ImageHandle, Release};
use crate::common::{FaceAuthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unknown,
    Granted,
    Denied,
}

/// Encoded still straight from a device.
#[derive(Debug, Clone)]
pub struct CapturedStill {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

/// Hardware behind the capture controller.
///
/// `release` must be idempotent: the controller calls it on every exit path,
/// including after a capture future was dropped mid-flight.
#[allow(async_fn_in_trait)]
pub trait CaptureDevice {
    fn describe(&self) -> String;

    async fn request_permission(&mut self) -> PermissionState;

    /// Starts the stream. Fails with `HardwareUnavailable`.
    async fn open(&mut self) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Grabs one still. Fails with `CaptureFailed`.
    async fn acquire(&mut self) -> Result<CapturedStill>;

    fn release(&mut self);
}

/// Where captured stills are written before they are handed out.
#[derive(Debug, Clone)]
pub struct CaptureSpool {
    dir: PathBuf,
    release: Release,
}

static NEXT_CAPTURE: AtomicU64 = AtomicU64::new(1);

impl CaptureSpool {
    pub fn new(dir: impl Into<PathBuf>, keep_captures: bool) -> Self {
        Self {
            dir: dir.into(),
            release: if keep_captures { Release::Keep } else { Release::Delete },
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, still: CapturedStill) -> Result<ImageHandle> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let seq = NEXT_CAPTURE.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!(
            "capture_{}_{}.{}",
            timestamp,
            seq,
            extension_for_mime(still.mime)
        ));
        tokio::fs::write(&path, &still.bytes).await?;
        tracing::debug!("Spooled {} byte capture to {}", still.bytes.len(), path.display());
        Ok(ImageHandle::spooled(path, still.mime, self.release))
    }
}

/// Token for an open camera stream. Only valid for the controller that issued it.
#[derive(Debug, PartialEq, Eq)]
pub struct CaptureSession {
    id: u64,
}

impl CaptureSession {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Owns the device lifecycle: permission, at most one open session, readiness
/// gating and release.
pub struct CaptureController<D: CaptureDevice> {
    device: D,
    spool: CaptureSpool,
    permission: PermissionState,
    active: Option<u64>,
    next_session: u64,
}

impl<D: CaptureDevice> CaptureController<D> {
    pub fn new(device: D, spool: CaptureSpool) -> Self {
        Self {
            device,
            spool,
            permission: PermissionState::Unknown,
            active: None,
            next_session: 1,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub async fn request_permission(&mut self) -> PermissionState {
        if self.permission != PermissionState::Granted {
            self.permission = self.device.request_permission().await;
            tracing::debug!("Camera permission for {}: {:?}", self.device.describe(), self.permission);
        }
        self.permission
    }

    pub async fn open(&mut self) -> Result<CaptureSession> {
        if self.active.is_some() {
            return Err(FaceAuthError::CaptureInProgress);
        }

        if self.request_permission().await != PermissionState::Granted {
            return Err(FaceAuthError::PermissionDenied);
        }

        if let Err(e) = self.device.open().await {
            self.device.release();
            return Err(match e {
                FaceAuthError::HardwareUnavailable(_) | FaceAuthError::PermissionDenied => e,
                other => FaceAuthError::HardwareUnavailable(other.to_string()),
            });
        }

        let id = self.next_session;
        self.next_session += 1;
        self.active = Some(id);
        tracing::info!("Opened capture session {} on {}", id, self.device.describe());
        Ok(CaptureSession { id })
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_ready(&self, session: &CaptureSession) -> bool {
        self.active == Some(session.id) && self.device.is_ready()
    }

    pub async fn capture(&mut self, session: &CaptureSession) -> Result<ImageHandle> {
        // Both checks run before the device is touched.
        if self.active != Some(session.id) || !self.device.is_ready() {
            return Err(FaceAuthError::CaptureNotReady);
        }

        let still = self.device.acquire().await.map_err(|e| match e {
            FaceAuthError::CaptureFailed(_) => e,
            other => FaceAuthError::CaptureFailed(other.to_string()),
        })?;

        self.spool.write(still).await
    }

    /// Safe to call repeatedly and with stale sessions.
    pub fn close(&mut self, session: &CaptureSession) {
        if self.active == Some(session.id) {
            self.release_active();
        }
    }

    /// Closes whatever session is open.
    pub fn close_all(&mut self) {
        if self.active.is_some() {
            self.release_active();
        }
    }

    fn release_active(&mut self) {
        self.device.release();
        if let Some(id) = self.active.take() {
            tracing::info!("Closed capture session {}", id);
        }
    }
}

impl<D: CaptureDevice> Drop for CaptureController<D> {
    fn drop(&mut self) {
        self.close_all();
    }
}
