//! Shared fakes for the workflow and client tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use supface::audit::MemoryAuditSink;
use supface::camera::{CaptureController, CaptureDevice, CaptureSpool, CapturedStill, ImageHandle, PermissionState};
use supface::common::config::BackendConfig;
use supface::protocol::{DeletionResult, EnrollmentProfile, EnrollmentResult, RegistrationStatus};
use supface::{FaceAuthError, Recognition, RecognitionBackend, Result, ServiceHealth};
use tempfile::TempDir;

pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0xFF, 0xD9];

/// Counters shared between a test and the device it handed to a controller.
#[derive(Default)]
pub struct DeviceProbe {
    pub opens: AtomicUsize,
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
}

impl DeviceProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeDevice {
    pub probe: Arc<DeviceProbe>,
    pub deny: bool,
    pub fail_open: bool,
    pub fail_acquire: bool,
    pub ready: bool,
}

impl FakeDevice {
    pub fn new(probe: Arc<DeviceProbe>) -> Self {
        Self { probe, ..Default::default() }
    }
}

impl CaptureDevice for FakeDevice {
    fn describe(&self) -> String {
        "fake camera".into()
    }

    async fn request_permission(&mut self) -> PermissionState {
        if self.deny { PermissionState::Denied } else { PermissionState::Granted }
    }

    async fn open(&mut self) -> Result<()> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(FaceAuthError::HardwareUnavailable("no stream".into()));
        }
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn acquire(&mut self) -> Result<CapturedStill> {
        self.probe.acquires.fetch_add(1, Ordering::SeqCst);
        if self.fail_acquire {
            return Err(FaceAuthError::CaptureFailed("driver timeout".into()));
        }
        Ok(CapturedStill { bytes: JPEG_BYTES.to_vec(), mime: "image/jpeg" })
    }

    fn release(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
        self.ready = false;
    }
}

pub fn camera(device: FakeDevice, spool_dir: &Path) -> CaptureController<FakeDevice> {
    CaptureController::new(device, CaptureSpool::new(spool_dir, false))
}

/// Backend with scripted answers. Every image it receives is recorded by id.
pub struct FakeBackend {
    pub health: Mutex<ServiceHealth>,
    pub auth_results: Mutex<VecDeque<Result<Recognition>>>,
    pub register_results: Mutex<VecDeque<Result<EnrollmentResult>>>,
    pub health_checks: AtomicUsize,
    pub consumed: Mutex<Vec<u64>>,
    pub profiles: Mutex<Vec<Option<EnrollmentProfile>>>,
    /// Applied to every register/authenticate call before it answers.
    pub latency: Mutex<Duration>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            health: Mutex::new(healthy()),
            auth_results: Mutex::new(VecDeque::new()),
            register_results: Mutex::new(VecDeque::new()),
            health_checks: AtomicUsize::new(0),
            consumed: Mutex::new(Vec::new()),
            profiles: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeBackend {
    pub fn with_auth(results: Vec<Result<Recognition>>) -> Arc<Self> {
        let backend = Self::default();
        *backend.auth_results.lock().unwrap() = results.into();
        Arc::new(backend)
    }

    pub fn with_register(health: ServiceHealth, results: Vec<Result<EnrollmentResult>>) -> Arc<Self> {
        let backend = Self::default();
        *backend.health.lock().unwrap() = health;
        *backend.register_results.lock().unwrap() = results.into();
        Arc::new(backend)
    }

    pub fn set_health(&self, health: ServiceHealth) {
        *self.health.lock().unwrap() = health;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    async fn respond_slowly(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn consumed(&self) -> Vec<u64> {
        self.consumed.lock().unwrap().clone()
    }

    fn consume(&self, image: ImageHandle) {
        self.consumed.lock().unwrap().push(image.id());
    }
}

impl RecognitionBackend for FakeBackend {
    async fn check_health(&self) -> ServiceHealth {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.health.lock().unwrap().clone()
    }

    async fn register(
        &self,
        _subject_id: &str,
        image: ImageHandle,
        profile: Option<&EnrollmentProfile>,
    ) -> Result<EnrollmentResult> {
        self.respond_slowly().await;
        self.consume(image);
        self.profiles.lock().unwrap().push(profile.cloned());
        let next = self.register_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(EnrollmentResult { message: Some("Face registered successfully".into()), subject_id: None }))
    }

    async fn authenticate(&self, image: ImageHandle) -> Result<Recognition> {
        self.respond_slowly().await;
        self.consume(image);
        let next = self.auth_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Recognition::not_recognized("Face not recognized")))
    }

    async fn get_status(&self, _subject_id: &str) -> RegistrationStatus {
        RegistrationStatus::default()
    }

    async fn delete_enrollment(&self, _subject_id: &str) -> Result<DeletionResult> {
        Ok(DeletionResult { message: None })
    }
}

pub fn healthy() -> ServiceHealth {
    ServiceHealth { healthy: true, models_loaded: true, registered_count: 1, error: None }
}

pub fn recognized(subject: &str, confidence: f64) -> Result<Recognition> {
    Ok(Recognition::Recognized { subject_id: subject.into(), confidence, profile: None })
}

pub fn not_recognized(distance: f64) -> Result<Recognition> {
    Ok(Recognition::NotRecognized {
        message: Some("Face not recognized".into()),
        closest_match: Some("u7".into()),
        distance: Some(distance),
    })
}

pub fn audit_sink() -> Arc<MemoryAuditSink> {
    Arc::new(MemoryAuditSink::new(1024))
}

/// A JPEG-named file on disk, not owned by any spool.
pub fn image_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn backend_config(base_url: &str) -> BackendConfig {
    BackendConfig {
        base_url: base_url.to_string(),
        request_timeout_secs: 5,
        connect_timeout_secs: 1,
        ..Default::default()
    }
}
