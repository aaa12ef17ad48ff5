use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An authenticated principal's credential window.
///
/// Either fully populated or absent: the store never exposes a session with
/// null required fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as epoch seconds.
    pub expires_at: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub email_confirmed: bool,
    pub user: SessionUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl AuthSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now().timestamp()
    }

    /// Seconds until expiry; zero when already expired.
    pub fn expires_in_secs(&self) -> i64 {
        (self.expires_at - Utc::now().timestamp()).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sign_in_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,
}

/// Derived state of the session store.
///
/// `Authenticated` iff a session is held; `Loading` only during the initial
/// fetch or a forced refresh that has not resolved; `Error` when the last
/// fetch failed and no prior authenticated session is being preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Loading,
    Authenticated,
    Unauthenticated,
    Error,
}

/// Where session credentials are persisted on the client.
///
/// `Memory` simulates cookie unavailability (embedded webviews, tests);
/// recorded for observability, not consulted by the store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Cookies,
    Memory,
}

/// Consecutive-failure state tracked for backoff.
///
/// `retry_in_ms: None` means the automatic budget is spent and only a
/// manual refresh will be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outage {
    pub retry_in_ms: Option<u64>,
    pub attempts: u32,
}

/// Atomic view of the store published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session: Option<AuthSession>,
    pub status: SessionStatus,
    pub storage_mode: StorageMode,
    pub last_error: Option<String>,
    pub outage: Option<Outage>,
}

impl SessionSnapshot {
    pub(crate) fn initial() -> Self {
        Self {
            session: None,
            status: SessionStatus::Loading,
            storage_mode: StorageMode::Cookies,
            last_error: None,
            outage: None,
        }
    }
}

/// Notice emitted while an outage is in progress, for UI display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutageNotice {
    pub retry_in_ms: u64,
    pub attempts: u32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> SessionUser {
        SessionUser {
            id: "a1111111-1111-1111-1111-111111111111".to_string(),
            email: "user@example.com".to_string(),
            email_confirmed_at: Some(Utc::now()),
            last_sign_in_at: Some(Utc::now()),
            app_metadata: HashMap::new(),
            user_metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_expiry() {
        let mut session = AuthSession {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now().timestamp() + 3600,
            token_type: "bearer".to_string(),
            email_confirmed: true,
            user: sample_user(),
        };
        assert!(!session.is_expired());
        assert!(session.expires_in_secs() > 3590);

        session.expires_at = Utc::now().timestamp() - 1;
        assert!(session.is_expired());
        assert_eq!(session.expires_in_secs(), 0);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let session: AuthSession = serde_json::from_str(
            r#"{
                "access_token": "at",
                "expires_at": 1893456000,
                "user": {"id": "u1", "email": "u@example.com"}
            }"#,
        )
        .unwrap();

        assert_eq!(session.token_type, "bearer");
        assert_eq!(session.refresh_token, None);
        assert!(!session.email_confirmed);
        assert!(session.user.app_metadata.is_empty());
    }

    #[test]
    fn test_status_serde_tags() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Unauthenticated).unwrap(),
            "\"unauthenticated\""
        );
        assert_eq!(
            serde_json::to_string(&StorageMode::Memory).unwrap(),
            "\"memory\""
        );
    }
}
