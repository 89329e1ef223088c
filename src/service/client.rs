use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::Form;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::audit::{AuditEvent, AuditKind, AuditSink, Severity};
use crate::camera::ImageHandle;
use crate::common::config::BackendConfig;
use crate::common::{FaceAuthError, Result};
use crate::service::encoding::{default_encoders, encode_image, ImageEncoder};
use crate::service::protocol::{
    AuthenticateBody, DeleteBody, DeletionResult, EnrollmentProfile, EnrollmentResult, ErrorBody,
    HealthBody, InfoBody, Recognition, RegisterBody, RegistrationStatus, ServiceHealth, ServiceInfo,
    StatusBody, UsersBody, FIELD_FILE, FIELD_PROFILE, FIELD_USER_ID, PATH_AUTHENTICATE, PATH_FACE,
    PATH_HEALTH, PATH_INFO, PATH_REGISTER, PATH_STATUS, PATH_USERS,
};

/// The four backend operations the workflows depend on.
///
/// Images are taken by value: once a still has backed one request it is gone.
pub trait RecognitionBackend: Send + Sync + 'static {
    /// Never fails; an unreachable backend is reported as unhealthy.
    fn check_health(&self) -> impl Future<Output = ServiceHealth> + Send;

    fn register(
        &self,
        subject_id: &str,
        image: ImageHandle,
        profile: Option<&EnrollmentProfile>,
    ) -> impl Future<Output = Result<EnrollmentResult>> + Send;

    fn authenticate(&self, image: ImageHandle) -> impl Future<Output = Result<Recognition>> + Send;

    /// Advisory: degrades to "not registered" on any failure.
    fn get_status(&self, subject_id: &str) -> impl Future<Output = RegistrationStatus> + Send;

    fn delete_enrollment(&self, subject_id: &str) -> impl Future<Output = Result<DeletionResult>> + Send;
}

pub struct RecognitionClient {
    http: reqwest::Client,
    base_url: Url,
    encoders: Vec<Box<dyn ImageEncoder>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl RecognitionClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FaceAuthError::Config(format!("Invalid backend URL {:?}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(FaceAuthError::Config(format!("Backend URL {} cannot be a base", base_url)));
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)));
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| FaceAuthError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            encoders: default_encoders(config.max_inline_image_bytes),
            audit: None,
        })
    }

    /// Replaces the encoding strategies, tried in the given order.
    pub fn with_encoders(mut self, encoders: Vec<Box<dyn ImageEncoder>>) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FaceAuthError::Config(format!("Backend URL {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit {
            sink.record(event);
        }
    }

    pub async fn service_info(&self) -> Result<ServiceInfo> {
        let url = self.endpoint(PATH_INFO)?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let body: InfoBody = read_json(response, "Failed to query service info").await?;
        Ok(body.into())
    }

    pub async fn check_health(&self) -> ServiceHealth {
        let url = match self.endpoint(PATH_HEALTH) {
            Ok(url) => url,
            Err(e) => return ServiceHealth::unreachable(e.to_string()),
        };
        tracing::debug!("Checking service health at {}", url);

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Health check failed: {}", e);
                return ServiceHealth::unreachable(transport_error(e).to_string());
            }
        };

        match read_json::<HealthBody>(response, "Health check failed").await {
            Ok(body) => {
                let health = ServiceHealth::from(body);
                tracing::debug!("Health: {:?}", health);
                health
            }
            Err(FaceAuthError::BackendRejected { status, message }) => {
                ServiceHealth::unreachable(format!("HTTP {}: {}", status, message))
            }
            Err(e) => ServiceHealth::unreachable(e.to_string()),
        }
    }

    pub async fn register(
        &self,
        subject_id: &str,
        image: ImageHandle,
        profile: Option<&EnrollmentProfile>,
    ) -> Result<EnrollmentResult> {
        let url = self.endpoint(PATH_REGISTER)?;
        tracing::info!("Registering face for subject {} (image {})", subject_id, image.id());

        let mut form = Form::new().text(FIELD_USER_ID, subject_id.to_string());
        if let Some(profile) = profile {
            form = form.text(FIELD_PROFILE, profile.to_form_value()?);
        }
        let part = encode_image(&self.encoders, &image).await?;
        let form = form.part(FIELD_FILE, part);

        let response = self.http.post(url).multipart(form).send().await.map_err(transport_error)?;
        drop(image);

        let body: RegisterBody = read_json(response, "Failed to register face").await?;
        let result = body.validate(subject_id)?;
        tracing::info!("Face registered for subject {}", subject_id);
        Ok(result)
    }

    pub async fn authenticate(&self, image: ImageHandle) -> Result<Recognition> {
        let url = self.endpoint(PATH_AUTHENTICATE)?;
        tracing::info!("Authenticating image {}", image.id());

        let part = encode_image(&self.encoders, &image).await?;
        let form = Form::new().part(FIELD_FILE, part);

        let response = self.http.post(url).multipart(form).send().await.map_err(transport_error)?;
        drop(image);

        let body: AuthenticateBody = read_json(response, "Failed to authenticate face").await?;
        let recognition = body.validate()?;
        tracing::debug!("Recognition result: recognized={}", recognition.is_recognized());
        Ok(recognition)
    }

    pub async fn get_status(&self, subject_id: &str) -> RegistrationStatus {
        match self.fetch_status(subject_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Status check for {} failed, assuming not registered: {}", subject_id, e);
                self.audit(
                    AuditEvent::new(AuditKind::StatusCheckError, subject_id, Severity::Low)
                        .with("error", e.to_string()),
                );
                RegistrationStatus::default()
            }
        }
    }

    async fn fetch_status(&self, subject_id: &str) -> Result<RegistrationStatus> {
        let mut segments: Vec<&str> = PATH_STATUS.to_vec();
        segments.push(subject_id);
        let url = self.endpoint(&segments)?;

        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let body: StatusBody = read_json(response, "Failed to check registration status").await?;
        body.validate(subject_id)
    }

    pub async fn delete_enrollment(&self, subject_id: &str) -> Result<DeletionResult> {
        let result = self.send_delete(subject_id).await;
        match &result {
            Ok(_) => {
                tracing::info!("Deleted face registration for {}", subject_id);
                self.audit(AuditEvent::new(AuditKind::DeletionSuccess, subject_id, Severity::Low));
            }
            Err(e) => {
                tracing::warn!("Failed to delete face registration for {}: {}", subject_id, e);
                self.audit(
                    AuditEvent::new(AuditKind::DeletionFailed, subject_id, Severity::High)
                        .with("error", e.to_string()),
                );
            }
        }
        result
    }

    async fn send_delete(&self, subject_id: &str) -> Result<DeletionResult> {
        let mut segments: Vec<&str> = PATH_FACE.to_vec();
        segments.push(subject_id);
        let url = self.endpoint(&segments)?;

        let response = self.http.delete(url).send().await.map_err(transport_error)?;
        let body: DeleteBody = read_json(response, "Failed to delete face registration").await?;
        Ok(DeletionResult { message: body.message })
    }

    /// Subjects with a stored enrollment.
    pub async fn list_enrollments(&self) -> Result<Vec<String>> {
        let url = self.endpoint(PATH_USERS)?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let body: UsersBody = read_json(response, "Failed to list registered faces").await?;
        body.validate()
    }
}

impl RecognitionBackend for RecognitionClient {
    async fn check_health(&self) -> ServiceHealth {
        RecognitionClient::check_health(self).await
    }

    async fn register(
        &self,
        subject_id: &str,
        image: ImageHandle,
        profile: Option<&EnrollmentProfile>,
    ) -> Result<EnrollmentResult> {
        RecognitionClient::register(self, subject_id, image, profile).await
    }

    async fn authenticate(&self, image: ImageHandle) -> Result<Recognition> {
        RecognitionClient::authenticate(self, image).await
    }

    async fn get_status(&self, subject_id: &str) -> RegistrationStatus {
        RecognitionClient::get_status(self, subject_id).await
    }

    async fn delete_enrollment(&self, subject_id: &str) -> Result<DeletionResult> {
        RecognitionClient::delete_enrollment(self, subject_id).await
    }
}

fn transport_error(e: reqwest::Error) -> FaceAuthError {
    if e.is_timeout() {
        FaceAuthError::NetworkUnreachable(format!("request timed out: {}", e))
    } else {
        FaceAuthError::NetworkUnreachable(e.to_string())
    }
}

/// Non-2xx becomes `BackendRejected` carrying the backend's `detail` when there
/// is one; a 2xx body that does not match `T` is `BackendMalformedResponse`.
async fn read_json<T: DeserializeOwned>(response: Response, fallback: &str) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport_error)?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(|body| body.message())
            .unwrap_or_else(|| generic_message(fallback, status));
        return Err(FaceAuthError::BackendRejected { status: status.as_u16(), message });
    }

    serde_json::from_slice(&bytes).map_err(|e| FaceAuthError::BackendMalformedResponse(e.to_string()))
}

fn generic_message(fallback: &str, status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} ({} {})", fallback, status.as_u16(), reason),
        None => format!("{} (HTTP {})", fallback, status.as_u16()),
    }
}
