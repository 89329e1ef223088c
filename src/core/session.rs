use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    FaceRecognition,
}

/// Handed to the caller when a face is recognized.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionGrant {
    pub token: String,
    pub subject_id: String,
    pub confidence: f64,
    pub method: AuthMethod,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,
}

impl SessionGrant {
    pub fn issue(subject_id: &str, confidence: f64, profile: Option<Value>, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            token: new_token(subject_id, issued_at),
            subject_id: subject_id.to_string(),
            confidence,
            method: AuthMethod::FaceRecognition,
            issued_at,
            expires_at,
            profile,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

fn new_token(subject_id: &str, issued_at: DateTime<Utc>) -> String {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(subject_id.as_bytes());
    hasher.update(issued_at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_ttl_saturates() {
        let grant = SessionGrant::issue("u1", 0.9, None, Duration::from_secs(u64::MAX / 2_000));
        assert_eq!(grant.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!grant.is_expired());
    }

    #[test]
    fn grants_are_unique_and_url_safe() {
        let ttl = Duration::from_secs(60);
        let a = SessionGrant::issue("u1", 0.9, None, ttl);
        let b = SessionGrant::issue("u1", 0.9, None, ttl);
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 43);
        assert!(a.token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn expiry_follows_ttl() {
        let grant = SessionGrant::issue("u1", 0.9, None, Duration::from_secs(60));
        assert!(!grant.is_expired());
        assert!(grant.is_expired_at(grant.issued_at + chrono::Duration::seconds(61)));
        assert_eq!(serde_json::to_value(&grant).unwrap()["method"], "face_recognition");
    }
}
