use thiserror::Error;

use crate::audit::Severity;

#[derive(Error, Debug)]
pub enum FaceAuthError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Capture requested before the session reported ready. Rejected without
    /// touching the device.
    #[error("Camera is not ready yet")]
    CaptureNotReady,

    #[error("Capture already in progress")]
    CaptureInProgress,

    #[error("Could not encode image: {0}")]
    EncodingFailed(String),

    #[error("Network error: {0}")]
    NetworkUnreachable(String),

    #[error("Backend rejected request (HTTP {status}): {message}")]
    BackendRejected { status: u16, message: String },

    #[error("Malformed backend response: {0}")]
    BackendMalformedResponse(String),

    #[error("Recognition service unhealthy: {0}")]
    ServiceUnhealthy(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FaceAuthError {
    /// Severity this failure is audited at.
    pub fn severity(&self) -> Severity {
        match self {
            FaceAuthError::PermissionDenied
            | FaceAuthError::CaptureNotReady
            | FaceAuthError::CaptureInProgress => Severity::Low,
            FaceAuthError::HardwareUnavailable(_)
            | FaceAuthError::CaptureFailed(_)
            | FaceAuthError::ServiceUnhealthy(_) => Severity::Medium,
            _ => Severity::High,
        }
    }

    /// Failures where the backend never produced a structured answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FaceAuthError::EncodingFailed(_)
                | FaceAuthError::NetworkUnreachable(_)
                | FaceAuthError::BackendMalformedResponse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FaceAuthError>;
