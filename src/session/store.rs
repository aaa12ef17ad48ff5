//! Session store state machine
//!
//! Single authoritative holder of the current session and status. All
//! transitions mutate state under one lock and publish one atomic snapshot,
//! so observers never see a half-updated (session, status) pair.
//!
//! Network failures never cross this boundary: callers observe only the
//! derived [`SessionStatus`], the last error message, and the outage record.
//!
//! This module emits tracing events:
//! - `session.refresh` - Session fetched (or fetch failed)
//! - `session.expired` - Backend reported no valid session
//! - `session.sign_out` - Sign-out flow
//! - `session.outage` - Consecutive-failure backoff state
//! - `session.channel` - Cross-context events applied

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::channel::{SessionChannel, SessionEvent, Subscription};
use crate::config::Config;
use crate::error::TidepoolError;
use crate::metrics::{SessionMetricSnapshot, SessionMetrics};
use crate::redirect::{Navigator, RedirectGuard, RedirectReason};
use crate::session::fetcher::SessionFetcher;
use crate::session::retry::{RetryController, RetryDecision};
use crate::session::types::{
    AuthSession, Outage, OutageNotice, SessionSnapshot, SessionStatus, StorageMode,
};

/// Buffered outage notices before slow observers lag.
const OUTAGE_CHANNEL_CAPACITY: usize = 16;

/// Handle to the session store. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: Config,
    fetcher: Arc<dyn SessionFetcher>,
    channel: Arc<SessionChannel>,
    redirect: RedirectGuard,
    retry: RetryController,
    state: Mutex<SessionSnapshot>,
    watch_tx: watch::Sender<SessionSnapshot>,
    outage_tx: broadcast::Sender<OutageNotice>,
    metrics: SessionMetrics,
    instance_id: String,
    subscription: Mutex<Option<Subscription>>,
}

impl SessionStore {
    /// Create a store wired to a broadcast channel and a navigator.
    ///
    /// The store subscribes to the channel immediately; events from other
    /// contexts are applied until [`shutdown`](Self::shutdown) or drop.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn SessionFetcher>,
        channel: Arc<SessionChannel>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (watch_tx, _) = watch::channel(SessionSnapshot::initial());
        let (outage_tx, _) = broadcast::channel(OUTAGE_CHANNEL_CAPACITY);

        let inner = Arc::new(StoreInner {
            redirect: RedirectGuard::new(config.redirect.clone(), navigator),
            retry: RetryController::new(config.retry.clone()),
            config,
            fetcher,
            channel,
            state: Mutex::new(SessionSnapshot::initial()),
            watch_tx,
            outage_tx,
            metrics: SessionMetrics::new(),
            instance_id: Uuid::new_v4().to_string(),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.channel.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_external_event(event);
            }
        });
        *lock(&inner.subscription) = Some(subscription);

        Self { inner }
    }

    /// This store's origin identifier, attached to every event it broadcasts.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Synchronous read of the current session. No side effects.
    pub fn session(&self) -> Option<AuthSession> {
        lock(&self.inner.state).session.clone()
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.state).status
    }

    /// Atomic view of (session, status, error, outage, storage mode).
    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.inner.state).clone()
    }

    /// Observe state transitions. The receiver always holds the latest
    /// snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.watch_tx.subscribe()
    }

    /// Observe outage notices emitted while retries are being scheduled.
    pub fn subscribe_outage(&self) -> broadcast::Receiver<OutageNotice> {
        self.inner.outage_tx.subscribe()
    }

    /// Fetch the session and apply the outcome.
    ///
    /// Cancels any pending scheduled retry first, so two fetch cycles never
    /// run concurrently for this store. Fetch errors are absorbed here; the
    /// returned value is whatever session the store holds afterwards.
    pub async fn refresh(&self) -> Option<AuthSession> {
        self.inner.run_refresh().await
    }

    /// Sign out: best-effort server call, then unconditionally clear the
    /// local session, broadcast, and redirect.
    pub async fn sign_out(&self) {
        self.inner.run_sign_out().await;
    }

    /// Apply a broadcast event received from another context.
    ///
    /// Events carrying this store's own origin are ignored; applied events
    /// are never re-broadcast.
    pub fn apply_external_event(&self, event: SessionEvent) {
        self.inner.apply_external_event(event);
    }

    /// Reset the redirect guard after the host application navigated.
    pub fn location_changed(&self) {
        self.inner.redirect.location_changed();
    }

    pub fn storage_mode(&self) -> StorageMode {
        lock(&self.inner.state).storage_mode
    }

    /// Record where credentials persist. Observability only; used by test
    /// harnesses to simulate cookie unavailability.
    pub fn set_storage_mode(&self, mode: StorageMode) {
        self.inner.mutate(|state| state.storage_mode = mode);
    }

    pub fn metrics(&self) -> SessionMetricSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Cancel the pending retry timer and stop consuming channel events.
    pub fn shutdown(&self) {
        self.inner.retry.cancel_pending();
        lock(&self.inner.subscription).take();
    }
}

impl StoreInner {
    async fn run_refresh(self: &Arc<Self>) -> Option<AuthSession> {
        // A manual refresh supersedes any scheduled one.
        self.retry.cancel_pending();

        self.mutate(|state| {
            if state.status != SessionStatus::Authenticated {
                state.status = SessionStatus::Loading;
            }
        });

        self.metrics.record_attempt();
        let started = std::time::Instant::now();
        let result = self.fetcher.fetch_session().await;
        self.metrics.record_fetch_latency(started.elapsed());

        match result {
            Ok(next) => self.apply_fetch_success(next),
            Err(TidepoolError::Unauthenticated) => self.handle_unauthenticated(),
            Err(err) => self.handle_fetch_failure(err.to_string()),
        }

        lock(&self.state).session.clone()
    }

    fn apply_fetch_success(&self, next: Option<AuthSession>) {
        self.retry.reset();

        let mut previously_empty = false;
        self.mutate(|state| {
            previously_empty = state.session.is_none();
            state.status = if next.is_some() {
                SessionStatus::Authenticated
            } else {
                SessionStatus::Unauthenticated
            };
            state.session = next.clone();
            state.last_error = None;
            state.outage = None;
        });

        tracing::info!(
            target: "session.refresh",
            authenticated = next.is_some(),
            "Session refreshed"
        );

        let origin = Some(self.instance_id.clone());
        let event = if previously_empty && next.is_some() {
            SessionEvent::SignedIn {
                session: next,
                origin,
            }
        } else {
            SessionEvent::SessionRefreshed {
                session: next,
                origin,
            }
        };
        self.channel.broadcast(event);
    }

    fn handle_unauthenticated(&self) {
        self.retry.reset();
        self.mutate(|state| {
            state.session = None;
            state.status = SessionStatus::Unauthenticated;
            state.last_error = None;
            state.outage = None;
        });

        tracing::info!(target: "session.expired", "Backend reported no valid session");

        self.channel.broadcast(SessionEvent::SignedOut {
            origin: Some(self.instance_id.clone()),
        });
        if self.redirect.redirect_to_sign_in(RedirectReason::Expired) {
            self.metrics.record_redirect();
        }
    }

    fn handle_fetch_failure(self: &Arc<Self>, message: String) {
        self.metrics.record_failure();

        match self.retry.record_failure() {
            RetryDecision::Schedule { delay, attempts } => {
                let retry_in_ms = delay.as_millis() as u64;
                self.mutate(|state| {
                    state.last_error = Some(message.clone());
                    state.outage = Some(Outage {
                        retry_in_ms: Some(retry_in_ms),
                        attempts,
                    });
                    // A held session is preserved across transient failures.
                    if state.status != SessionStatus::Authenticated {
                        state.status = SessionStatus::Error;
                    }
                });

                tracing::warn!(
                    target: "session.outage",
                    attempts,
                    retry_in_ms,
                    error = %message,
                    "Session fetch failed, retry scheduled"
                );

                let _ = self.outage_tx.send(OutageNotice {
                    retry_in_ms,
                    attempts,
                    message,
                });

                let weak = Arc::downgrade(self);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        // Drop the stored handle first: the cancel path in
                        // run_refresh must not abort this very task mid-fetch.
                        inner.retry.disarm();
                        boxed_refresh(inner).await;
                    }
                });
                self.retry.arm(handle);
            }
            RetryDecision::Exhausted { attempts } => {
                let exhausted = TidepoolError::RetryExhausted { attempts };
                self.mutate(|state| {
                    state.last_error = Some(exhausted.to_string());
                    state.outage = Some(Outage {
                        retry_in_ms: None,
                        attempts,
                    });
                    if state.status != SessionStatus::Authenticated {
                        state.status = SessionStatus::Error;
                    }
                });

                tracing::error!(
                    target: "session.outage",
                    attempts,
                    error = %message,
                    "Retries exhausted, manual refresh required"
                );
            }
        }
    }

    async fn run_sign_out(self: &Arc<Self>) {
        self.retry.cancel_pending();

        if let Err(err) = self.fetcher.sign_out().await {
            tracing::warn!(
                target: "session.sign_out",
                error = %err,
                "Sign-out request failed; clearing local session anyway"
            );
        }

        self.retry.reset();
        self.mutate(|state| {
            state.session = None;
            state.status = SessionStatus::Unauthenticated;
            state.last_error = None;
            state.outage = None;
        });

        tracing::info!(target: "session.sign_out", "Signed out");

        self.channel.broadcast(SessionEvent::SignedOut {
            origin: Some(self.instance_id.clone()),
        });
        if self.redirect.redirect_to_sign_in(RedirectReason::SignedOut) {
            self.metrics.record_redirect();
        }
    }

    fn apply_external_event(&self, event: SessionEvent) {
        // Self-broadcasts are feedback, not news.
        if event.origin() == Some(self.instance_id.as_str()) {
            return;
        }

        tracing::debug!(
            target: "session.channel",
            origin = event.origin().unwrap_or("unknown"),
            terminal = event.is_terminal(),
            "Applying cross-context session event"
        );

        if event.is_terminal() {
            self.retry.reset();
            self.mutate(|state| {
                state.session = None;
                state.status = SessionStatus::Unauthenticated;
                state.last_error = None;
                state.outage = None;
            });
            if self.redirect.redirect_to_sign_in(RedirectReason::Expired) {
                self.metrics.record_redirect();
            }
            return;
        }

        let next = event.session().cloned();
        self.retry.reset();
        self.mutate(|state| {
            state.status = if next.is_some() {
                SessionStatus::Authenticated
            } else {
                SessionStatus::Unauthenticated
            };
            state.session = next;
            state.last_error = None;
            state.outage = None;
        });
    }

    /// Apply one transition and publish the snapshot, both under the state
    /// lock: transitions racing on different threads must reach watch
    /// observers in the order they were applied. No `.await` happens here,
    /// so holding the lock across the publish is fine.
    fn mutate<F: FnOnce(&mut SessionSnapshot)>(&self, apply: F) {
        let mut state = lock(&self.state);
        apply(&mut state);
        self.watch_tx.send_replace(state.clone());
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.retry.cancel_pending();
    }
}

/// Type-erased refresh future, so the retry task can re-enter the refresh
/// cycle without a recursive opaque future type.
fn boxed_refresh(inner: Arc<StoreInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        inner.run_refresh().await;
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
