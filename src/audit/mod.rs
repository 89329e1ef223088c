//! Security audit events.
//!
//! Workflows describe what happened as an [`AuditEvent`] and hand it to an
//! [`AuditSink`]. Recording is fire-and-forget: `record` has no return value
//! and a sink that cannot persist an event must swallow the failure.

pub mod sinks;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub use sinks::{FanoutAuditSink, JsonlAuditSink, MemoryAuditSink, TracingAuditSink};

/// Subject id used when the person in front of the camera is not known yet.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    EnrollmentBlocked,
    EnrollmentSuccess,
    EnrollmentFailed,
    EnrollmentError,
    EnrollmentSkipped,
    AuthSuccess,
    AuthFailed,
    AuthError,
    AuthLockedOut,
    AuthSwitchToAlternate,
    CaptureError,
    StatusCheckError,
    DeletionSuccess,
    DeletionFailed,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::EnrollmentBlocked => "ENROLLMENT_BLOCKED",
            AuditKind::EnrollmentSuccess => "ENROLLMENT_SUCCESS",
            AuditKind::EnrollmentFailed => "ENROLLMENT_FAILED",
            AuditKind::EnrollmentError => "ENROLLMENT_ERROR",
            AuditKind::EnrollmentSkipped => "ENROLLMENT_SKIPPED",
            AuditKind::AuthSuccess => "AUTH_SUCCESS",
            AuditKind::AuthFailed => "AUTH_FAILED",
            AuditKind::AuthError => "AUTH_ERROR",
            AuditKind::AuthLockedOut => "AUTH_LOCKED_OUT",
            AuditKind::AuthSwitchToAlternate => "AUTH_SWITCH_TO_ALTERNATE",
            AuditKind::CaptureError => "CAPTURE_ERROR",
            AuditKind::StatusCheckError => "STATUS_CHECK_ERROR",
            AuditKind::DeletionSuccess => "DELETION_SUCCESS",
            AuditKind::DeletionFailed => "DELETION_FAILED",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectCategory {
    FaceRecognition,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub category: SubjectCategory,
    pub subject_id: String,
    pub detail: Map<String, Value>,
    pub severity: Severity,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, subject_id: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind,
            category: SubjectCategory::FaceRecognition,
            subject_id: subject_id.into(),
            detail: Map::new(),
            severity,
            recorded_at: Utc::now(),
        }
    }

    /// Adds a detail field; `None` values are left out.
    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.detail.insert(key.to_string(), value);
        }
        self
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.detail.get(key).and_then(Value::as_str)
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}
