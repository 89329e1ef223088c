use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{FaceAuthError, Result};

// Backend paths
pub const PATH_INFO: &[&str] = &[];
pub const PATH_HEALTH: &[&str] = &["api", "health"];
pub const PATH_REGISTER: &[&str] = &["api", "face", "register"];
pub const PATH_AUTHENTICATE: &[&str] = &["api", "face", "authenticate"];
pub const PATH_STATUS: &[&str] = &["api", "face", "status"];
pub const PATH_FACE: &[&str] = &["api", "face"];
pub const PATH_USERS: &[&str] = &["api", "face", "users"];

// Multipart field names
pub const FIELD_USER_ID: &str = "user_id";
pub const FIELD_PROFILE: &str = "profile_data";
pub const FIELD_FILE: &str = "file";

// ---------------------------------------------------------------------------
// Domain types

/// Point-in-time probe of the recognition backend. Never persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub models_loaded: bool,
    pub registered_count: u64,
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            models_loaded: false,
            registered_count: 0,
            error: Some(error.into()),
        }
    }

    /// Short reason for an unhealthy probe.
    pub fn reason(&self) -> String {
        match (&self.error, self.models_loaded) {
            (Some(error), _) => error.clone(),
            (None, false) => "Recognition models are not loaded".to_string(),
            (None, true) => "Recognition service reported an unhealthy status".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    Conservative,
    Moderate,
    Impulsive,
}

/// Metadata stored next to an enrollment. Unknown keys round-trip through `extra`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EnrollmentProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_profile: Option<RiskProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnrollmentProfile {
    pub fn to_form_value(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| FaceAuthError::EncodingFailed(format!("Profile is not serializable: {}", e)))
    }
}

/// Successful registration. Rejections surface as `FaceAuthError::BackendRejected`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentResult {
    pub message: Option<String>,
    pub subject_id: Option<String>,
}

/// Outcome of an authentication request. Exactly one shape holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Recognized {
        subject_id: String,
        /// In `[0, 1]`.
        confidence: f64,
        profile: Option<Value>,
    },
    NotRecognized {
        message: Option<String>,
        closest_match: Option<String>,
        /// Lower is closer.
        distance: Option<f64>,
    },
}

impl Recognition {
    pub fn is_recognized(&self) -> bool {
        matches!(self, Recognition::Recognized { .. })
    }

    pub fn not_recognized(message: impl Into<String>) -> Self {
        Recognition::NotRecognized {
            message: Some(message.into()),
            closest_match: None,
            distance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistrationStatus {
    pub registered: bool,
    pub profile: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeletionResult {
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Wire bodies

#[derive(Deserialize, Debug)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorBody {
    /// `detail` is a string for handled errors and a list of `{msg, ...}`
    /// objects for request validation errors.
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                (!msgs.is_empty()).then(|| msgs.join("; "))
            }
            _ => None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct InfoBody {
    pub message: String,
    pub version: String,
}

impl From<InfoBody> for ServiceInfo {
    fn from(body: InfoBody) -> Self {
        Self { message: body.message, version: body.version }
    }
}

#[derive(Deserialize, Debug)]
pub struct HealthBody {
    pub status: String,
    pub models_loaded: bool,
    #[serde(default)]
    pub registered_faces: u64,
}

impl From<HealthBody> for ServiceHealth {
    fn from(body: HealthBody) -> Self {
        Self {
            healthy: body.status == "healthy" && body.models_loaded,
            models_loaded: body.models_loaded,
            registered_count: body.registered_faces,
            error: None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct RegisterBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl RegisterBody {
    pub fn validate(self, requested: &str) -> Result<EnrollmentResult> {
        if let Some(echo) = &self.user_id {
            if echo != requested {
                return Err(FaceAuthError::BackendMalformedResponse(format!(
                    "registration echoed subject {:?} for request {:?}",
                    echo, requested
                )));
            }
        }
        Ok(EnrollmentResult { message: self.message, subject_id: self.user_id })
    }
}

#[derive(Deserialize, Debug)]
pub struct AuthenticateBody {
    pub recognized: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub profile: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub closest_match: Option<String>,
    #[serde(default)]
    pub distance: Option<f64>,
}

impl AuthenticateBody {
    pub fn validate(self) -> Result<Recognition> {
        let malformed = |what: &str| Err(FaceAuthError::BackendMalformedResponse(what.to_string()));

        if self.recognized {
            let Some(subject_id) = self.user_id.filter(|id| !id.is_empty()) else {
                return malformed("recognized result without user_id");
            };
            let Some(confidence) = self.confidence else {
                return malformed("recognized result without confidence");
            };
            if !(0.0..=1.0).contains(&confidence) {
                return malformed(&format!("confidence {} outside [0, 1]", confidence));
            }
            Ok(Recognition::Recognized {
                subject_id,
                confidence,
                profile: self.profile.filter(|p| !p.is_null()),
            })
        } else {
            if self.user_id.is_some() {
                return malformed("unrecognized result carrying a user_id");
            }
            if let Some(distance) = self.distance {
                if !distance.is_finite() || distance < 0.0 {
                    return malformed(&format!("invalid distance {}", distance));
                }
            }
            Ok(Recognition::NotRecognized {
                message: self.message,
                closest_match: self.closest_match,
                distance: self.distance,
            })
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct StatusBody {
    pub user_id: String,
    pub face_registered: bool,
    #[serde(default)]
    pub profile: Option<Value>,
}

impl StatusBody {
    pub fn validate(self, requested: &str) -> Result<RegistrationStatus> {
        if self.user_id != requested {
            return Err(FaceAuthError::BackendMalformedResponse(format!(
                "status for {:?} answered for {:?}",
                requested, self.user_id
            )));
        }
        Ok(RegistrationStatus {
            registered: self.face_registered,
            profile: self.profile.filter(|p| !p.is_null()),
        })
    }
}

#[derive(Deserialize, Debug)]
pub struct DeleteBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UsersBody {
    pub users: Vec<String>,
    pub count: usize,
}

impl UsersBody {
    pub fn validate(self) -> Result<Vec<String>> {
        if self.count != self.users.len() {
            return Err(FaceAuthError::BackendMalformedResponse(format!(
                "user count {} does not match {} listed users",
                self.count,
                self.users.len()
            )));
        }
        Ok(self.users)
    }
}
