use serde::{Deserialize, Serialize};

use crate::session::AuthSession;

/// A cross-context session-state transition.
///
/// Each event carries a full replacement session (or a clear signal), never
/// a delta, so consumers may treat events as idempotent "latest known state"
/// signals regardless of arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SignedIn {
        session: Option<AuthSession>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    SessionRefreshed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<AuthSession>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    SignedOut {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    TokenExpired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
}

impl SessionEvent {
    /// The browsing-context instance that produced this event, used to
    /// suppress self-feedback.
    pub fn origin(&self) -> Option<&str> {
        match self {
            Self::SignedIn { origin, .. }
            | Self::SessionRefreshed { origin, .. }
            | Self::SignedOut { origin }
            | Self::TokenExpired { origin } => origin.as_deref(),
        }
    }

    /// The session payload, when the event carries one.
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            Self::SignedIn { session, .. } | Self::SessionRefreshed { session, .. } => {
                session.as_ref()
            }
            Self::SignedOut { .. } | Self::TokenExpired { .. } => None,
        }
    }

    /// Whether the event signals loss of session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SignedOut { .. } | Self::TokenExpired { .. })
    }
}
