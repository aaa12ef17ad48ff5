//! Tidepool - client session synchronization
//!
//! Tidepool keeps a client's view of a managed auth session coherent across
//! browsing contexts: a single-source-of-truth session store, cross-context
//! broadcast of session transitions, capped exponential backoff on fetch
//! failures, a one-shot redirect guard, and a submission de-duplication
//! guard. Server-side companions (route-protection middleware, CSRF
//! helpers) live alongside.
//!
//! # Features
//!
//! - **Session Store**: atomic (session, status) snapshots observable via
//!   a watch channel
//! - **Broadcast Channel**: native cross-context fan-out with an in-memory
//!   fallback and a per-name singleton cache
//! - **Retry Controller**: bounded exponential backoff with a single
//!   cancellable timer
//! - **Guards**: one-shot sign-in redirects, duplicate-submission
//!   rejection, CSRF validation
//! - **Testing**: scriptable fetcher, recording navigator, harness hooks
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidepool::{session_channel, ConfigBuilder, HttpSessionFetcher, SessionStore};
//!
//! # struct AppNavigator;
//! # impl tidepool::Navigator for AppNavigator {
//! #     fn current_path(&self) -> String { "/".into() }
//! #     fn navigate(&self, _url: &str) {}
//! # }
//! #[tokio::main]
//! async fn main() {
//!     tidepool::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build().unwrap();
//!     let fetcher = Arc::new(HttpSessionFetcher::new(config.endpoints.clone()));
//!     let channel = session_channel(&config.channel.name);
//!     let store = SessionStore::new(config, fetcher, channel, Arc::new(AppNavigator));
//!
//!     store.refresh().await;
//! }
//! ```

pub mod channel;
mod config;
pub mod csrf;
mod error;
pub mod guard;
pub mod metrics;
pub mod redirect;
pub mod session;
pub mod submission;
pub mod testing;

// Re-exports for public API
pub use channel::{
    reset_session_channel, session_channel, ChannelMode, SessionChannel, SessionEvent,
    Subscription,
};
pub use config::{
    ChannelConfig, Config, ConfigBuilder, EndpointConfig, RedirectConfig, RetryConfig,
    SubmissionConfig,
};
pub use error::{ErrorCode, Result, TidepoolError};
pub use guard::{SessionGuard, SessionValidator};
pub use metrics::SessionMetricSnapshot;
pub use redirect::{Navigator, RedirectGuard, RedirectReason};
pub use session::{
    AuthSession, HttpSessionFetcher, Outage, OutageNotice, SessionFetcher, SessionSnapshot,
    SessionStatus, SessionStore, SessionUser, StorageMode,
};
pub use submission::SubmissionGuard;
pub use testing::{fake, MockSessionFetcher, RecordingNavigator, SessionTestHooks};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// Call early, before constructing the session store.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "tidepool=debug")
/// - `TIDEPOOL_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("TIDEPOOL_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
