//! Face enrollment for a known subject.
//!
//! `Idle -> HealthChecking -> Capturing -> Processing -> Success`, with
//! `Blocked` when the backend is not healthy and `Failed` when registration
//! does not go through. Both are retryable; a retry re-runs the health check.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::audit::{AuditEvent, AuditKind, AuditSink, Severity};
use crate::camera::{CaptureController, CaptureDevice, CaptureSession, ImageHandle};
use crate::common::config::EnrollmentConfig;
use crate::common::FaceAuthError;
use crate::service::{EnrollmentProfile, EnrollmentResult, RecognitionBackend};

const REGISTRATION_ERROR: &str = "An error occurred while registering your face. Please try again.";

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentState {
    Idle { notice: Option<String> },
    HealthChecking,
    /// Backend unhealthy. The caller offers retry or cancel.
    Blocked { reason: String },
    Capturing,
    Processing,
    Success(EnrollmentResult),
    /// Registration did not go through. Retryable.
    Failed { message: String },
    Skipped,
    Dismissed,
}

impl EnrollmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrollmentState::Success(_) | EnrollmentState::Skipped | EnrollmentState::Dismissed)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EnrollmentState::Idle { .. } | EnrollmentState::Blocked { .. } | EnrollmentState::Failed { .. }
        )
    }
}

struct Shared<B> {
    backend: Arc<B>,
    audit: Arc<dyn AuditSink>,
    state: watch::Sender<EnrollmentState>,
    subject_id: String,
}

impl<B> Shared<B> {
    fn set(&self, state: EnrollmentState) {
        tracing::debug!("Enrollment state -> {:?}", state);
        self.state.send_replace(state);
    }

    fn finish_processing(&self, state: EnrollmentState) {
        self.state.send_if_modified(|current| {
            if *current != EnrollmentState::Processing {
                return false;
            }
            tracing::debug!("Enrollment state -> {:?}", state);
            *current = state;
            true
        });
    }

    fn event(&self, kind: AuditKind, severity: Severity, profile: Option<&EnrollmentProfile>) -> AuditEvent {
        let event = AuditEvent::new(kind, self.subject_id.as_str(), severity);
        match profile {
            Some(profile) => event
                .with("risk_profile", profile.risk_profile.and_then(|p| serde_json::to_value(p).ok()))
                .with("risk_score", profile.risk_score),
            None => event,
        }
    }
}

pub struct EnrollmentWorkflow<D: CaptureDevice, B: RecognitionBackend> {
    camera: CaptureController<D>,
    session: Option<CaptureSession>,
    profile: Option<EnrollmentProfile>,
    config: EnrollmentConfig,
    shared: Arc<Shared<B>>,
}

impl<D: CaptureDevice, B: RecognitionBackend> EnrollmentWorkflow<D, B> {
    pub fn new(
        camera: CaptureController<D>,
        backend: Arc<B>,
        audit: Arc<dyn AuditSink>,
        config: EnrollmentConfig,
        subject_id: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(EnrollmentState::Idle { notice: None });
        Self {
            camera,
            session: None,
            profile: None,
            config,
            shared: Arc::new(Shared { backend, audit, state, subject_id: subject_id.into() }),
        }
    }

    /// Metadata stored alongside the enrollment.
    pub fn with_profile(mut self, profile: EnrollmentProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.shared.subject_id
    }

    pub fn current_state(&self) -> EnrollmentState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EnrollmentState> {
        self.shared.state.subscribe()
    }

    pub fn camera(&self) -> &CaptureController<D> {
        &self.camera
    }

    pub fn dismiss_delay(&self) -> Duration {
        Duration::from_millis(self.config.success_dismiss_ms)
    }

    /// Runs the health gate and opens the camera only if the backend is healthy.
    pub async fn start(&mut self) -> EnrollmentState {
        let state = self.current_state();
        if !state.is_retryable() && state != EnrollmentState::HealthChecking {
            tracing::debug!("start() ignored in {:?}", state);
            return state;
        }

        self.close_camera();
        self.shared.set(EnrollmentState::HealthChecking);

        let health = self.shared.backend.check_health().await;
        if !health.healthy {
            let reason = health.reason();
            tracing::warn!("Enrollment blocked, recognition service unhealthy: {}", reason);
            let error = FaceAuthError::ServiceUnhealthy(reason.clone());
            self.shared.audit.record(
                self.shared
                    .event(AuditKind::EnrollmentBlocked, error.severity(), None)
                    .with("error", reason.clone())
                    .with("models_loaded", health.models_loaded),
            );
            self.shared.set(EnrollmentState::Blocked { reason });
            return self.current_state();
        }
        tracing::debug!("Recognition service healthy ({} faces registered)", health.registered_count);

        match self.camera.open().await {
            Ok(session) => {
                self.session = Some(session);
                self.shared.set(EnrollmentState::Capturing);
            }
            Err(e) => self.capture_failed(e),
        }
        self.current_state()
    }

    /// Drops any pending capture and starts over from the health check.
    pub async fn retry(&mut self) -> EnrollmentState {
        self.start().await
    }

    pub async fn capture(&mut self) -> EnrollmentState {
        if self.current_state() != EnrollmentState::Capturing {
            return self.current_state();
        }
        let Some(session) = &self.session else {
            return self.current_state();
        };

        match self.camera.capture(session).await {
            Ok(image) => self.submit_capture(image).await,
            Err(FaceAuthError::CaptureNotReady) => {
                tracing::debug!("Capture requested before the camera was ready");
                self.current_state()
            }
            Err(e) => {
                self.capture_failed(e);
                self.current_state()
            }
        }
    }

    /// Registers the still. Dropping the returned future does not cancel the
    /// request; its outcome is still audited and published.
    pub async fn submit_capture(&mut self, image: ImageHandle) -> EnrollmentState {
        let state = self.current_state();
        if state != EnrollmentState::Capturing {
            tracing::warn!("Discarding capture {} submitted in {:?}", image.id(), state);
            image.discard();
            return state;
        }

        self.close_camera();
        self.shared.set(EnrollmentState::Processing);

        let mut profile = self.profile.clone();
        if let Some(profile) = profile.as_mut() {
            profile.registered_at.get_or_insert_with(chrono::Utc::now);
        }

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { process(shared, image, profile).await });

        if let Err(e) = task.await {
            tracing::error!("Enrollment task failed: {}", e);
            self.shared.finish_processing(EnrollmentState::Failed { message: REGISTRATION_ERROR.to_string() });
        }
        self.current_state()
    }

    /// Leaves enrollment for later. Not available while a registration is in flight.
    pub fn skip(&mut self) -> EnrollmentState {
        let state = self.current_state();
        if state.is_terminal() || state == EnrollmentState::Processing {
            return state;
        }

        self.close_camera();
        tracing::info!("Enrollment skipped for {}", self.shared.subject_id);
        self.shared.audit.record(
            self.shared
                .event(AuditKind::EnrollmentSkipped, Severity::Medium, self.profile.as_ref())
                .with("from_state", state_name(&state)),
        );
        self.shared.set(EnrollmentState::Skipped);
        EnrollmentState::Skipped
    }

    /// `Capturing` goes back to `Idle`; `Blocked`, `Failed` and `Idle` are
    /// dismissed. A registration in flight keeps running.
    pub fn cancel(&mut self) -> EnrollmentState {
        let next = match self.current_state() {
            EnrollmentState::Capturing => EnrollmentState::Idle { notice: None },
            EnrollmentState::Idle { .. }
            | EnrollmentState::HealthChecking
            | EnrollmentState::Blocked { .. }
            | EnrollmentState::Failed { .. } => EnrollmentState::Dismissed,
            other => return other,
        };
        self.close_camera();
        self.shared.set(next.clone());
        next
    }

    fn capture_failed(&mut self, e: FaceAuthError) {
        tracing::warn!("Capture failed: {}", e);
        self.close_camera();
        self.shared.audit.record(
            self.shared
                .event(AuditKind::CaptureError, e.severity(), None)
                .with("error", e.to_string())
                .with("flow", "enrollment"),
        );
        self.shared.set(EnrollmentState::Idle { notice: Some(e.to_string()) });
    }

    fn close_camera(&mut self) {
        if let Some(session) = self.session.take() {
            self.camera.close(&session);
        }
    }
}

async fn process<B: RecognitionBackend>(shared: Arc<Shared<B>>, image: ImageHandle, profile: Option<EnrollmentProfile>) {
    match shared.backend.register(&shared.subject_id, image, profile.as_ref()).await {
        Ok(result) => {
            tracing::info!("Enrollment completed for {}", shared.subject_id);
            shared.audit.record(
                shared
                    .event(AuditKind::EnrollmentSuccess, Severity::Low, profile.as_ref())
                    .with("message", result.message.clone()),
            );
            shared.finish_processing(EnrollmentState::Success(result));
        }
        Err(FaceAuthError::BackendRejected { status, message }) => {
            tracing::warn!("Registration rejected with HTTP {}: {}", status, message);
            shared.audit.record(
                shared
                    .event(AuditKind::EnrollmentFailed, Severity::High, profile.as_ref())
                    .with("error", message.clone())
                    .with("status", status),
            );
            shared.finish_processing(EnrollmentState::Failed { message });
        }
        Err(e) => {
            tracing::warn!("Registration request failed: {}", e);
            shared.audit.record(
                shared
                    .event(AuditKind::EnrollmentError, Severity::High, profile.as_ref())
                    .with("error", e.to_string())
                    .with("transport", e.is_transport()),
            );
            shared.finish_processing(EnrollmentState::Failed { message: REGISTRATION_ERROR.to_string() });
        }
    }
}

fn state_name(state: &EnrollmentState) -> &'static str {
    match state {
        EnrollmentState::Idle { .. } => "idle",
        EnrollmentState::HealthChecking => "health_checking",
        EnrollmentState::Blocked { .. } => "blocked",
        EnrollmentState::Capturing => "capturing",
        EnrollmentState::Processing => "processing",
        EnrollmentState::Success(_) => "success",
        EnrollmentState::Failed { .. } => "failed",
        EnrollmentState::Skipped => "skipped",
        EnrollmentState::Dismissed => "dismissed",
    }
}
