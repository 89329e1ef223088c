mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{audit_sink, camera, healthy, DeviceProbe, FakeBackend, FakeDevice};
use supface::audit::{AuditKind, MemoryAuditSink, Severity};
use supface::common::config::EnrollmentConfig;
use supface::core::{EnrollmentState, EnrollmentWorkflow};
use supface::protocol::{EnrollmentProfile, EnrollmentResult, RiskProfile};
use supface::{FaceAuthError, ServiceHealth};
use tempfile::TempDir;

struct Harness {
    flow: EnrollmentWorkflow<FakeDevice, FakeBackend>,
    backend: Arc<FakeBackend>,
    audit: Arc<MemoryAuditSink>,
    probe: Arc<DeviceProbe>,
    _spool: TempDir,
}

fn harness(backend: Arc<FakeBackend>) -> Harness {
    harness_with(backend, FakeDevice::default())
}

fn harness_with(backend: Arc<FakeBackend>, device: FakeDevice) -> Harness {
    let spool = tempfile::tempdir().unwrap();
    let probe = Arc::clone(&device.probe);
    let audit = audit_sink();
    let flow = EnrollmentWorkflow::new(
        camera(device, spool.path()),
        Arc::clone(&backend),
        audit.clone(),
        EnrollmentConfig::default(),
        "u1",
    )
    .with_profile(EnrollmentProfile {
        risk_profile: Some(RiskProfile::Moderate),
        risk_score: Some(42.0),
        ..Default::default()
    });
    Harness { flow, backend, audit, probe, _spool: spool }
}

fn unhealthy() -> ServiceHealth {
    ServiceHealth::unreachable("connection refused")
}

#[tokio::test]
async fn unhealthy_backend_blocks_before_the_camera() {
    let mut h = harness(FakeBackend::with_register(unhealthy(), vec![]));

    let state = h.flow.start().await;
    match &state {
        EnrollmentState::Blocked { reason } => assert_eq!(reason, "connection refused"),
        other => panic!("expected Blocked, got {other:?}"),
    }
    assert!(state.is_retryable());
    assert_eq!(h.probe.opens(), 0);
    assert!(!h.flow.camera().is_open());

    let blocked = h.audit.of_kind(AuditKind::EnrollmentBlocked);
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].subject_id, "u1");

    // Cancel dismisses.
    assert_eq!(h.flow.cancel(), EnrollmentState::Dismissed);
    assert!(h.backend.consumed().is_empty());
}

#[tokio::test]
async fn models_not_loaded_also_blocks() {
    let health = ServiceHealth { healthy: false, models_loaded: false, registered_count: 0, error: None };
    let mut h = harness(FakeBackend::with_register(health, vec![]));

    assert_eq!(
        h.flow.start().await,
        EnrollmentState::Blocked { reason: "Recognition models are not loaded".into() }
    );
    assert_eq!(h.probe.opens(), 0);
}

#[tokio::test]
async fn retry_reruns_the_health_check() {
    let mut h = harness(FakeBackend::with_register(unhealthy(), vec![]));
    assert!(matches!(h.flow.start().await, EnrollmentState::Blocked { .. }));

    h.backend.set_health(healthy());
    assert_eq!(h.flow.retry().await, EnrollmentState::Capturing);
    assert_eq!(h.backend.health_checks(), 2);
    assert_eq!(h.probe.opens(), 1);
}

#[tokio::test]
async fn successful_enrollment() {
    let mut h = harness(FakeBackend::with_register(healthy(), vec![]));

    assert_eq!(h.flow.start().await, EnrollmentState::Capturing);
    let state = h.flow.capture().await;
    assert!(matches!(state, EnrollmentState::Success(_)), "got {state:?}");
    assert!(state.is_terminal());

    let success = h.audit.of_kind(AuditKind::EnrollmentSuccess);
    assert_eq!(success.len(), 1);
    assert_eq!(success[0].severity, Severity::Low);
    assert_eq!(success[0].detail_str("risk_profile"), Some("moderate"));
    assert_eq!(success[0].detail["risk_score"], 42.0);

    let profiles = h.backend.profiles.lock().unwrap().clone();
    let sent = profiles[0].as_ref().unwrap();
    assert!(sent.registered_at.is_some());
    assert_eq!(h.backend.consumed().len(), 1);
    assert!(!h.flow.camera().is_open());
}

#[tokio::test]
async fn rejected_registration_is_retryable() {
    let mut h = harness(FakeBackend::with_register(
        healthy(),
        vec![
            Err(FaceAuthError::BackendRejected { status: 400, message: "No face detected in image".into() }),
            Ok(EnrollmentResult { message: Some("Face registered successfully".into()), subject_id: Some("u1".into()) }),
        ],
    ));

    h.flow.start().await;
    let state = h.flow.capture().await;
    assert_eq!(state, EnrollmentState::Failed { message: "No face detected in image".into() });
    assert_eq!(h.audit.count(AuditKind::EnrollmentFailed), 1);
    assert_eq!(h.audit.of_kind(AuditKind::EnrollmentFailed)[0].severity, Severity::High);

    assert_eq!(h.flow.retry().await, EnrollmentState::Capturing);
    assert!(matches!(h.flow.capture().await, EnrollmentState::Success(_)));
    assert_eq!(h.backend.health_checks(), 2);

    let consumed = h.backend.consumed();
    assert_eq!(consumed.len(), 2);
    assert_ne!(consumed[0], consumed[1]);
}

#[tokio::test]
async fn transport_failure_is_audited_as_error() {
    let mut h = harness(FakeBackend::with_register(
        healthy(),
        vec![Err(FaceAuthError::NetworkUnreachable("connection reset".into()))],
    ));

    h.flow.start().await;
    assert!(matches!(h.flow.capture().await, EnrollmentState::Failed { .. }));
    let errors = h.audit.of_kind(AuditKind::EnrollmentError);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].detail["transport"], true);
    assert_eq!(h.audit.count(AuditKind::EnrollmentFailed), 0);
}

#[tokio::test]
async fn skip_is_distinct_from_failure() {
    let mut h = harness(FakeBackend::with_register(healthy(), vec![]));
    h.flow.start().await;

    assert_eq!(h.flow.skip(), EnrollmentState::Skipped);
    assert!(!h.flow.camera().is_open());
    assert_eq!(h.audit.count(AuditKind::EnrollmentSkipped), 1);
    assert_eq!(h.audit.count(AuditKind::EnrollmentFailed), 0);
    assert_eq!(h.audit.of_kind(AuditKind::EnrollmentSkipped)[0].severity, Severity::Medium);

    // Terminal.
    assert_eq!(h.flow.start().await, EnrollmentState::Skipped);
    assert_eq!(h.backend.health_checks(), 1);
}

#[tokio::test]
async fn cancel_while_capturing_returns_to_idle() {
    let mut h = harness(FakeBackend::with_register(healthy(), vec![]));
    h.flow.start().await;

    assert_eq!(h.flow.cancel(), EnrollmentState::Idle { notice: None });
    assert_eq!(h.probe.releases(), 1);
    assert_eq!(h.probe.acquires(), 0);
}

#[tokio::test]
async fn camera_failure_returns_to_idle_with_notice() {
    let device = FakeDevice { fail_open: true, ..Default::default() };
    let mut h = harness_with(FakeBackend::with_register(healthy(), vec![]), device);

    let state = h.flow.start().await;
    assert!(matches!(state, EnrollmentState::Idle { notice: Some(_) }));
    let errors = h.audit.of_kind(AuditKind::CaptureError);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].detail_str("flow"), Some("enrollment"));
}

#[tokio::test]
async fn abandoned_capture_still_completes_registration() {
    let mut h = harness(FakeBackend::with_register(healthy(), vec![]));
    h.backend.set_latency(Duration::from_millis(300));
    let mut states = h.flow.subscribe();

    assert_eq!(h.flow.start().await, EnrollmentState::Capturing);
    let abandoned = tokio::time::timeout(Duration::from_millis(50), h.flow.capture()).await;
    assert!(abandoned.is_err());

    assert_eq!(h.flow.current_state(), EnrollmentState::Processing);
    assert_eq!(h.flow.start().await, EnrollmentState::Processing);
    assert_eq!(h.backend.health_checks(), 1);

    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s != EnrollmentState::Processing))
        .await
        .expect("registration never settled")
        .unwrap();

    assert!(matches!(h.flow.current_state(), EnrollmentState::Success(_)));
    assert_eq!(h.audit.count(AuditKind::EnrollmentSuccess), 1);
    assert_eq!(h.backend.consumed().len(), 1);
}
