//! Redirect guard
//!
//! Ensures at most one navigation away from the app fires per loss of
//! session, carrying the originating path and a machine-readable reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::config::RedirectConfig;

/// Why the user is being sent to the sign-in entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectReason {
    Expired,
    SignedOut,
    SessionError,
    Unauthenticated,
    EmailUnverified,
}

impl RedirectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::SignedOut => "signed-out",
            Self::SessionError => "session-error",
            Self::Unauthenticated => "unauthenticated",
            Self::EmailUnverified => "email-unverified",
        }
    }
}

impl std::fmt::Display for RedirectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for observing and changing the host application's location.
pub trait Navigator: Send + Sync {
    /// The path the user is currently on.
    fn current_path(&self) -> String;

    /// Navigate to `url`. Fire-and-forget.
    fn navigate(&self, url: &str);
}

/// Build the sign-in URL carrying the return path and reason.
pub fn sign_in_url(config: &RedirectConfig, return_to: &str, reason: RedirectReason) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("returnTo", return_to)
        .append_pair("reason", reason.as_str())
        .finish();
    format!("{}?{}", config.sign_in_path, query)
}

/// One-shot navigation guard around a [`Navigator`].
pub struct RedirectGuard {
    config: RedirectConfig,
    navigator: Arc<dyn Navigator>,
    navigating: AtomicBool,
}

impl RedirectGuard {
    pub fn new(config: RedirectConfig, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            config,
            navigator,
            navigating: AtomicBool::new(false),
        }
    }

    /// Navigate to the sign-in entry point, at most once per loss of
    /// session.
    ///
    /// No-op while a navigation is already in flight or when the current
    /// location is already under the auth path prefix. Returns whether a
    /// navigation fired.
    pub fn redirect_to_sign_in(&self, reason: RedirectReason) -> bool {
        // Claim the flag before consulting the navigator: concurrent losses
        // of session must collapse into a single navigation.
        if self
            .navigating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let current = self.navigator.current_path();
        if current.starts_with(&self.config.auth_path_prefix) {
            self.navigating.store(false, Ordering::SeqCst);
            return false;
        }

        let url = sign_in_url(&self.config, &current, reason);
        tracing::info!(
            target: "session.redirect",
            reason = reason.as_str(),
            return_to = %current,
            "Redirecting to sign-in"
        );
        self.navigator.navigate(&url);
        true
    }

    /// Reset the in-flight flag after the location actually changed, so a
    /// later loss of session can redirect again.
    pub fn location_changed(&self) {
        self.navigating.store(false, Ordering::SeqCst);
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating.load(Ordering::SeqCst)
    }
}
