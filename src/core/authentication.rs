//! Attempt-limited face authentication.
//!
//! `Idle -> Capturing -> Processing -> { Success | Idle (one attempt fewer) | LockedOut }`,
//! with `SwitchedToAlternate` reachable from any state that is not terminal.
//!
//! A structured non-recognition costs an attempt and is audited `AUTH_FAILED`.
//! A failure that never produced a structured answer (encoding, transport,
//! malformed body) returns to `Idle` without touching the counter and is
//! audited `AUTH_ERROR`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::audit::{AuditEvent, AuditKind, AuditSink, Severity};
use crate::camera::{CaptureController, CaptureDevice, CaptureSession, ImageHandle};
use crate::common::config::AuthConfig;
use crate::common::FaceAuthError;
use crate::core::session::SessionGrant;
use crate::service::{Recognition, RecognitionBackend};

const NOT_RECOGNIZED: &str = "Face not recognized";
const PROCESSING_ERROR: &str = "An error occurred during face authentication. Please try again.";

/// Attempt accounting for one authentication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthAttemptState {
    remaining: u32,
    max: u32,
}

impl AuthAttemptState {
    pub fn new(max: u32) -> Self {
        Self { remaining: max, max }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn locked_out(&self) -> bool {
        self.remaining == 0
    }

    /// Never goes below zero. Returns what is left.
    pub fn record_failure(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Retry,
    UseAlternate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Idle {
        /// Why the previous attempt did not succeed, if there was one.
        notice: Option<String>,
        attempts_remaining: u32,
    },
    Capturing,
    Processing,
    Success(SessionGrant),
    LockedOut,
    SwitchedToAlternate,
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Success(_) | AuthState::LockedOut | AuthState::SwitchedToAlternate)
    }

    /// What the caller may offer the user from here. A locked out session
    /// never offers a retry.
    pub fn actions(&self) -> &'static [AuthAction] {
        match self {
            AuthState::Idle { notice: Some(_), .. } => &[AuthAction::Retry, AuthAction::UseAlternate],
            AuthState::Idle { notice: None, .. }
            | AuthState::Capturing
            | AuthState::Processing
            | AuthState::LockedOut => &[AuthAction::UseAlternate],
            AuthState::Success(_) | AuthState::SwitchedToAlternate => &[],
        }
    }
}

/// Everything the in-flight processing task needs. Outlives the caller's
/// future so a closed UI cannot lose an attempt or an audit event.
struct Shared<B> {
    backend: Arc<B>,
    audit: Arc<dyn AuditSink>,
    state: watch::Sender<AuthState>,
    attempts: Mutex<AuthAttemptState>,
    config: AuthConfig,
    claimed_subject: Option<String>,
}

impl<B> Shared<B> {
    fn attempts(&self) -> AuthAttemptState {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_failure(&self) -> u32 {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).record_failure()
    }

    fn set(&self, state: AuthState) {
        tracing::debug!("Authentication state -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Only moves out of `Processing`; a session the user already left keeps its state.
    fn finish_processing(&self, state: AuthState) {
        self.state.send_if_modified(|current| {
            if *current == AuthState::Processing {
                tracing::debug!("Authentication state -> {:?}", state);
                *current = state;
                true
            } else {
                tracing::debug!("Processing finished after the session moved to {:?}", current);
                false
            }
        });
    }

    fn event(&self, kind: AuditKind, subject_id: &str, severity: Severity) -> AuditEvent {
        AuditEvent::new(kind, subject_id, severity).with("claimed_subject", self.claimed_subject.clone())
    }

    fn idle(&self, notice: Option<String>) -> AuthState {
        AuthState::Idle { notice, attempts_remaining: self.attempts().remaining() }
    }
}

pub struct AuthenticationWorkflow<D: CaptureDevice, B: RecognitionBackend> {
    camera: CaptureController<D>,
    session: Option<CaptureSession>,
    shared: Arc<Shared<B>>,
}

impl<D: CaptureDevice, B: RecognitionBackend> AuthenticationWorkflow<D, B> {
    pub fn new(
        camera: CaptureController<D>,
        backend: Arc<B>,
        audit: Arc<dyn AuditSink>,
        config: AuthConfig,
    ) -> Self {
        let attempts = AuthAttemptState::new(config.max_attempts);
        let (state, _) = watch::channel(AuthState::Idle { notice: None, attempts_remaining: attempts.remaining() });

        Self {
            camera,
            session: None,
            shared: Arc::new(Shared {
                backend,
                audit,
                state,
                attempts: Mutex::new(attempts),
                config,
                claimed_subject: None,
            }),
        }
    }

    /// Identifier the user typed before choosing face login. Only recorded in
    /// audit details; recognition itself is 1:N.
    pub fn with_claimed_subject(mut self, subject: impl Into<String>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.claimed_subject = Some(subject.into());
        }
        self
    }

    pub fn current_state(&self) -> AuthState {
        self.shared.state.borrow().clone()
    }

    pub fn attempts(&self) -> AuthAttemptState {
        self.shared.attempts()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.shared.state.subscribe()
    }

    pub fn camera(&self) -> &CaptureController<D> {
        &self.camera
    }

    /// How long a caller should show `Success` before moving on.
    pub fn dismiss_delay(&self) -> Duration {
        Duration::from_millis(self.shared.config.success_dismiss_ms)
    }

    /// Opens the camera. Only valid from `Idle`.
    pub async fn start(&mut self) -> AuthState {
        match self.current_state() {
            AuthState::Idle { .. } => {}
            other => {
                tracing::debug!("start() ignored in {:?}", other);
                return other;
            }
        }

        if self.shared.attempts().locked_out() {
            self.shared.set(AuthState::LockedOut);
            return AuthState::LockedOut;
        }

        match self.camera.open().await {
            Ok(session) => {
                self.session = Some(session);
                self.shared.set(AuthState::Capturing);
            }
            Err(e) => self.capture_failed(e),
        }
        self.current_state()
    }

    pub async fn retry(&mut self) -> AuthState {
        self.start().await
    }

    /// Takes a still from the open session and submits it.
    pub async fn capture(&mut self) -> AuthState {
        if self.current_state() != AuthState::Capturing {
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

    /// Sends the still to the backend and resolves once the attempt is
    /// accounted for. Dropping the returned future does not cancel the request.
    pub async fn submit_capture(&mut self, image: ImageHandle) -> AuthState {
        let state = self.current_state();
        if state != AuthState::Capturing {
            tracing::warn!("Discarding capture {} submitted in {:?}", image.id(), state);
            image.discard();
            return state;
        }

        self.close_camera();
        self.shared.set(AuthState::Processing);

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { process(shared, image).await });

        if let Err(e) = task.await {
            tracing::error!("Authentication task failed: {}", e);
            let idle = self.shared.idle(Some(PROCESSING_ERROR.to_string()));
            self.shared.finish_processing(idle);
        }
        self.current_state()
    }

    /// Ends the session for the alternate credential path. Does not cost an attempt.
    pub fn use_alternate(&mut self) -> AuthState {
        let state = self.current_state();
        if matches!(state, AuthState::Success(_) | AuthState::SwitchedToAlternate) {
            return state;
        }

        self.close_camera();
        let attempts = self.shared.attempts();
        self.shared.audit.record(
            self.shared
                .event(AuditKind::AuthSwitchToAlternate, crate::audit::ANONYMOUS_SUBJECT, Severity::Low)
                .with("attempts_remaining", attempts.remaining())
                .with("from_state", state_name(&state)),
        );
        tracing::info!("Switching to alternate credential ({} attempts left)", attempts.remaining());
        self.shared.set(AuthState::SwitchedToAlternate);
        AuthState::SwitchedToAlternate
    }

    /// Closes the camera. An in-flight request keeps running.
    pub fn cancel(&mut self) -> AuthState {
        match self.current_state() {
            AuthState::Capturing => {
                self.close_camera();
                let idle = self.shared.idle(None);
                self.shared.set(idle.clone());
                idle
            }
            other => other,
        }
    }

    fn capture_failed(&mut self, e: FaceAuthError) {
        tracing::warn!("Capture failed: {}", e);
        self.close_camera();
        self.shared.audit.record(
            self.shared
                .event(AuditKind::CaptureError, crate::audit::ANONYMOUS_SUBJECT, e.severity())
                .with("error", e.to_string())
                .with("flow", "authentication"),
        );
        let idle = self.shared.idle(Some(e.to_string()));
        self.shared.set(idle);
    }

    fn close_camera(&mut self) {
        if let Some(session) = self.session.take() {
            self.camera.close(&session);
        }
    }
}

async fn process<B: RecognitionBackend>(shared: Arc<Shared<B>>, image: ImageHandle) {
    match shared.backend.authenticate(image).await {
        Ok(Recognition::Recognized { subject_id, confidence, profile }) => {
            let ttl = Duration::from_secs(shared.config.session_ttl_secs);
            let grant = SessionGrant::issue(&subject_id, confidence, profile, ttl);
            tracing::info!("Authenticated {} (confidence {:.3})", subject_id, confidence);
            shared.audit.record(
                shared
                    .event(AuditKind::AuthSuccess, &subject_id, Severity::Low)
                    .with("confidence", confidence),
            );
            shared.finish_processing(AuthState::Success(grant));
        }
        Ok(Recognition::NotRecognized { message, closest_match, distance }) => {
            not_recognized(&shared, message, closest_match, distance);
        }
        Err(FaceAuthError::BackendRejected { status, message }) => {
            tracing::debug!("Backend rejected the image with HTTP {}", status);
            not_recognized(&shared, Some(message), None, None);
        }
        Err(e) => {
            tracing::warn!("Authentication request failed: {}", e);
            shared.audit.record(
                shared
                    .event(AuditKind::AuthError, crate::audit::ANONYMOUS_SUBJECT, Severity::High)
                    .with("error", e.to_string())
                    .with("transport", e.is_transport())
                    .with("attempts_remaining", shared.attempts().remaining()),
            );
            let idle = shared.idle(Some(PROCESSING_ERROR.to_string()));
            shared.finish_processing(idle);
        }
    }
}

fn not_recognized<B>(
    shared: &Shared<B>,
    message: Option<String>,
    closest_match: Option<String>,
    distance: Option<f64>,
) {
    let remaining = shared.record_failure();
    let message = message.filter(|m| !m.trim().is_empty()).unwrap_or_else(|| NOT_RECOGNIZED.to_string());
    tracing::info!("Face not recognized: {} ({} attempts left)", message, remaining);

    shared.audit.record(
        shared
            .event(AuditKind::AuthFailed, crate::audit::ANONYMOUS_SUBJECT, Severity::Medium)
            .with("message", message.clone())
            .with("distance", distance)
            .with("closest_match", closest_match)
            .with("attempts_remaining", remaining),
    );

    if remaining == 0 {
        tracing::warn!("Authentication locked out after {} failed attempts", shared.attempts().max());
        shared.audit.record(
            shared
                .event(AuditKind::AuthLockedOut, crate::audit::ANONYMOUS_SUBJECT, Severity::High)
                .with("max_attempts", shared.attempts().max()),
        );
        shared.finish_processing(AuthState::LockedOut);
    } else {
        let notice = format!("{}. {} attempt(s) remaining.", message.trim_end_matches('.'), remaining);
        shared.finish_processing(AuthState::Idle { notice: Some(notice), attempts_remaining: remaining });
    }
}

fn state_name(state: &AuthState) -> &'static str {
    match state {
        AuthState::Idle { .. } => "idle",
        AuthState::Capturing => "capturing",
        AuthState::Processing => "processing",
        AuthState::Success(_) => "success",
        AuthState::LockedOut => "locked_out",
        AuthState::SwitchedToAlternate => "switched_to_alternate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_saturate_at_zero() {
        let mut attempts = AuthAttemptState::new(2);
        assert!(!attempts.locked_out());
        assert_eq!(attempts.record_failure(), 1);
        assert_eq!(attempts.record_failure(), 0);
        assert!(attempts.locked_out());
        assert_eq!(attempts.record_failure(), 0);
        assert_eq!(attempts.max(), 2);
    }

    #[test]
    fn lockout_never_offers_retry() {
        assert!(!AuthState::LockedOut.actions().contains(&AuthAction::Retry));
        let failed = AuthState::Idle { notice: Some("no".into()), attempts_remaining: 1 };
        assert_eq!(failed.actions(), &[AuthAction::Retry, AuthAction::UseAlternate]);
        assert!(AuthState::SwitchedToAlternate.is_terminal());
    }
}
