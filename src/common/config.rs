use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{FaceAuthError, Result};

pub const BACKEND_URL_ENV: &str = "SUPFACE_BACKEND_URL";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 0 disables the timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Stills above this size skip the inline base64 strategy.
    #[serde(default = "default_max_inline")]
    pub max_inline_image_bytes: u64,
}

fn default_base_url() -> String { "http://127.0.0.1:8000".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_connect_timeout() -> u64 { 5 }
fn default_max_inline() -> u64 { 8 * 1024 * 1024 }

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_inline_image_bytes: default_max_inline(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// 999 picks the first device that supports video capture.
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 5 }
fn default_warmup_delay() -> u64 { 50 }
fn default_jpeg_quality() -> u8 { 80 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_width(),
            height: default_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_auth_dismiss")]
    pub success_dismiss_ms: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_auth_dismiss() -> u64 { 1500 }
fn default_session_ttl() -> u64 { 24 * 60 * 60 }

/// 30 days.
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            success_dismiss_ms: default_auth_dismiss(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrollmentConfig {
    #[serde(default = "default_enroll_dismiss")]
    pub success_dismiss_ms: u64,
}

fn default_enroll_dismiss() -> u64 { 2000 }

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self { success_dismiss_ms: default_enroll_dismiss() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

fn default_memory_capacity() -> usize { 10_000 }

impl Default for AuditConfig {
    fn default() -> Self {
        Self { log_path: None, memory_capacity: default_memory_capacity() }
    }
}

impl Config {
    /// Loads `path` if it exists, otherwise runs on defaults (plus the environment).
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from_path(path);
        }

        tracing::warn!("No config at {}, using defaults", path.display());
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FaceAuthError::Config(format!(
                "Config file not found: {}. Please create it from configs/supface.example.toml.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| FaceAuthError::Config(format!("Config parse error: {}", e)))?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// `SUPFACE_BACKEND_URL` wins over the file.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                self.backend.base_url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Backend
        let url = reqwest::Url::parse(&self.backend.base_url).map_err(|e| {
            FaceAuthError::Config(format!("Invalid backend URL {:?}: {}", self.backend.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(FaceAuthError::Config(format!(
                "Backend URL must be http(s), got {}", self.backend.base_url
            )));
        }
        if self.backend.request_timeout_secs > 600 {
            return Err(FaceAuthError::Config(format!(
                "Request timeout must be at most 600 seconds, got {}",
                self.backend.request_timeout_secs
            )));
        }

        // Camera
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(FaceAuthError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(FaceAuthError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return Err(FaceAuthError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}", self.camera.jpeg_quality
            )));
        }

        // Attempts
        if self.auth.max_attempts == 0 || self.auth.max_attempts > 10 {
            return Err(FaceAuthError::Config(format!(
                "Max attempts must be between 1 and 10, got {}", self.auth.max_attempts
            )));
        }
        if self.auth.session_ttl_secs == 0 || self.auth.session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(FaceAuthError::Config(format!(
                "Session TTL must be between 1 and {} seconds, got {}",
                MAX_SESSION_TTL_SECS, self.auth.session_ttl_secs
            )));
        }

        if self.audit.memory_capacity == 0 {
            return Err(FaceAuthError::Config("Audit memory capacity must be positive".into()));
        }

        Ok(())
    }
}
