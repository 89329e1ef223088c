// Core modules
pub mod audit;
pub mod camera;
pub mod common;
pub mod core;
pub mod service;

// Re-export commonly used types
pub use audit::{AuditEvent, AuditKind, AuditSink, Severity};
pub use camera::{CaptureController, CaptureDevice, CaptureSpool, ImageHandle, StillImageDevice, V4lCamera};
pub use common::{Config, DevMode, FaceAuthError, Result};
pub use core::{
    AuthAttemptState, AuthState, AuthenticationWorkflow, EnrollmentState, EnrollmentWorkflow, SessionGrant,
};
pub use service::{protocol, Recognition, RecognitionBackend, RecognitionClient, ServiceHealth};
