//! Test utilities
//!
//! Fakes and harness hooks for exercising the session store without a
//! backend: a scriptable [`SessionFetcher`], a recording [`Navigator`],
//! sample-data builders, and the black-box [`SessionTestHooks`] surface.
//! Not part of the production contract.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{Result, TidepoolError};
use crate::metrics::SessionMetricSnapshot;
use crate::redirect::Navigator;
use crate::session::{AuthSession, SessionFetcher, SessionStore, StorageMode};

/// Sample-data builders.
pub mod fake {
    use chrono::Utc;
    use std::collections::HashMap;

    use crate::session::{AuthSession, SessionUser};

    pub fn user() -> SessionUser {
        SessionUser {
            id: "a1111111-1111-1111-1111-111111111111".to_string(),
            email: "user@example.com".to_string(),
            email_confirmed_at: Some(Utc::now()),
            last_sign_in_at: Some(Utc::now()),
            app_metadata: HashMap::new(),
            user_metadata: HashMap::new(),
        }
    }

    pub fn session() -> AuthSession {
        session_expiring_in(3600)
    }

    pub fn session_expiring_in(secs: i64) -> AuthSession {
        AuthSession {
            access_token: "access-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            expires_at: Utc::now().timestamp() + secs,
            token_type: "bearer".to_string(),
            email_confirmed: true,
            user: user(),
        }
    }
}

enum Scripted {
    Session(Option<AuthSession>),
    Network(String),
    Unauthenticated,
}

/// Scriptable fetcher: queued responses are consumed in order; an empty
/// queue answers "no session" unless [`fail_by_default`] was set.
///
/// [`fail_by_default`]: MockSessionFetcher::fail_by_default
pub struct MockSessionFetcher {
    script: Mutex<VecDeque<Scripted>>,
    default_error: Mutex<Option<String>>,
    sign_out_error: Mutex<Option<String>>,
    fetch_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl MockSessionFetcher {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_error: Mutex::new(None),
            sign_out_error: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    pub fn respond_with_session(&self, session: AuthSession) {
        lock(&self.script).push_back(Scripted::Session(Some(session)));
    }

    pub fn respond_empty(&self) {
        lock(&self.script).push_back(Scripted::Session(None));
    }

    pub fn respond_network_error(&self, message: impl Into<String>) {
        lock(&self.script).push_back(Scripted::Network(message.into()));
    }

    pub fn respond_unauthenticated(&self) {
        lock(&self.script).push_back(Scripted::Unauthenticated);
    }

    /// Every fetch with an empty script fails with this network error.
    pub fn fail_by_default(&self, message: impl Into<String>) {
        *lock(&self.default_error) = Some(message.into());
    }

    /// Make sign-out calls fail with a network error.
    pub fn fail_sign_out(&self, message: impl Into<String>) {
        *lock(&self.sign_out_error) = Some(message.into());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSessionFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFetcher for MockSessionFetcher {
    async fn fetch_session(&self) -> Result<Option<AuthSession>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        match lock(&self.script).pop_front() {
            Some(Scripted::Session(session)) => Ok(session),
            Some(Scripted::Network(message)) => Err(TidepoolError::Network(message)),
            Some(Scripted::Unauthenticated) => Err(TidepoolError::Unauthenticated),
            None => match lock(&self.default_error).clone() {
                Some(message) => Err(TidepoolError::Network(message)),
                None => Ok(None),
            },
        }
    }

    async fn sign_out(&self) -> Result<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.sign_out_error).clone() {
            Some(message) => Err(TidepoolError::Network(message)),
            None => Ok(()),
        }
    }
}

/// Navigator that records navigations instead of performing them.
pub struct RecordingNavigator {
    path: Mutex<String>,
    navigations: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::at("/")
    }

    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: Mutex::new(path.into()),
            navigations: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the host application moving to a new location.
    pub fn set_path(&self, path: impl Into<String>) {
        *lock(&self.path) = path.into();
    }

    pub fn navigations(&self) -> Vec<String> {
        lock(&self.navigations).clone()
    }
}

impl Default for RecordingNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator for RecordingNavigator {
    fn current_path(&self) -> String {
        lock(&self.path).clone()
    }

    fn navigate(&self, url: &str) {
        lock(&self.navigations).push(url.to_string());
    }
}

/// Black-box harness surface over a [`SessionStore`]: forced refresh,
/// storage-mode toggle, and a metrics snapshot accessor.
pub struct SessionTestHooks {
    store: SessionStore,
}

impl SessionTestHooks {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub async fn force_session_refresh(&self) {
        self.store.refresh().await;
    }

    /// `false` simulates cookie unavailability by switching the store to
    /// in-memory persistence.
    pub fn set_cookies_enabled(&self, enabled: bool) {
        self.store.set_storage_mode(if enabled {
            StorageMode::Cookies
        } else {
            StorageMode::Memory
        });
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.store.storage_mode()
    }

    pub fn collect_metrics(&self) -> SessionMetricSnapshot {
        self.store.metrics()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fetcher_consumes_script_in_order() {
        let fetcher = MockSessionFetcher::new();
        fetcher.respond_with_session(fake::session());
        fetcher.respond_unauthenticated();

        assert!(fetcher.fetch_session().await.unwrap().is_some());
        assert!(matches!(
            fetcher.fetch_session().await,
            Err(TidepoolError::Unauthenticated)
        ));
        // Empty script: no session.
        assert!(fetcher.fetch_session().await.unwrap().is_none());
        assert_eq!(fetcher.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_fetcher_default_error() {
        let fetcher = MockSessionFetcher::new();
        fetcher.fail_by_default("offline");
        assert!(matches!(
            fetcher.fetch_session().await,
            Err(TidepoolError::Network(msg)) if msg == "offline"
        ));
    }

    #[test]
    fn test_recording_navigator() {
        let navigator = RecordingNavigator::at("/dashboard");
        assert_eq!(navigator.current_path(), "/dashboard");

        navigator.navigate("/auth/sign-in?reason=expired");
        navigator.set_path("/auth/sign-in");

        assert_eq!(navigator.navigations(), vec!["/auth/sign-in?reason=expired"]);
        assert_eq!(navigator.current_path(), "/auth/sign-in");
    }
}
