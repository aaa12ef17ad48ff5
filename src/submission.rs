//! Submission de-duplication guard
//!
//! A short-window idempotency cache preventing duplicate form submissions
//! (double-click, retried form post) of the same logical request from
//! reaching the backend twice. Rejection happens locally, before any
//! request is sent.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::SubmissionConfig;
use crate::error::{Result, TidepoolError};

pub struct SubmissionGuard {
    config: SubmissionConfig,
    entries: Mutex<HashMap<String, Instant>>,
}

impl SubmissionGuard {
    pub fn new(config: SubmissionConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_ms)
    }

    /// Register an idempotency key.
    ///
    /// Returns `false` when the key was already registered within the
    /// de-duplication window; the stale timestamp is not refreshed. An
    /// empty key always passes (the guard is opt-in).
    ///
    /// At capacity, entries older than the window are lazily swept before
    /// insertion. A burst of fresh keys below the cap is left untouched.
    pub fn register(&self, key: &str) -> bool {
        if key.is_empty() {
            return true;
        }

        let now = Instant::now();
        let window = self.window();
        let mut entries = self.lock_entries();

        if entries.len() >= self.config.capacity {
            entries.retain(|_, seen| now.duration_since(*seen) <= window);
        }

        if let Some(seen) = entries.get(key) {
            if now.duration_since(*seen) < window {
                tracing::debug!(
                    target: "session.submission",
                    key,
                    "Duplicate submission rejected"
                );
                return false;
            }
        }

        entries.insert(key.to_string(), now);
        true
    }

    /// [`register`](Self::register) as a fallible operation, for call
    /// sites that propagate errors.
    pub fn check(&self, key: &str) -> Result<()> {
        if self.register(key) {
            Ok(())
        } else {
            Err(TidepoolError::duplicate_submission(key))
        }
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SubmissionGuard {
    fn default() -> Self {
        Self::new(SubmissionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn guard(window_ms: u64, capacity: usize) -> SubmissionGuard {
        SubmissionGuard::new(SubmissionConfig {
            window_ms,
            capacity,
        })
    }

    #[test]
    fn test_duplicate_within_window_rejected() {
        let guard = guard(5000, 500);
        assert!(guard.register("sign-in:abc"));
        assert!(!guard.register("sign-in:abc"));
    }

    #[test]
    fn test_key_accepted_again_after_window() {
        let guard = guard(30, 500);
        assert!(guard.register("resend:xyz"));
        assert!(!guard.register("resend:xyz"));

        sleep(Duration::from_millis(40));
        assert!(guard.register("resend:xyz"));
    }

    #[test]
    fn test_rejection_does_not_refresh_timestamp() {
        let guard = guard(50, 500);
        assert!(guard.register("k"));

        sleep(Duration::from_millis(30));
        assert!(!guard.register("k"));

        // Had the rejection refreshed the timestamp, the key would still be
        // blocked here.
        sleep(Duration::from_millis(30));
        assert!(guard.register("k"));
    }

    #[test]
    fn test_empty_key_always_accepted() {
        let guard = guard(5000, 500);
        assert!(guard.register(""));
        assert!(guard.register(""));
        assert!(guard.is_empty());
    }

    #[test]
    fn test_capacity_sweep_evicts_only_stale_entries() {
        let guard = guard(40, 4);
        assert!(guard.register("old-1"));
        assert!(guard.register("old-2"));

        sleep(Duration::from_millis(60));
        assert!(guard.register("fresh-1"));
        assert!(guard.register("fresh-2"));
        assert_eq!(guard.len(), 4);

        // At capacity: the stale pair is swept, the fresh pair survives.
        assert!(guard.register("fresh-3"));
        assert_eq!(guard.len(), 3);
        assert!(!guard.register("fresh-1"));
    }

    #[test]
    fn test_check_maps_to_error() {
        let guard = guard(5000, 500);
        assert!(guard.check("once").is_ok());
        let err = guard.check("once").unwrap_err();
        assert!(matches!(err, TidepoolError::DuplicateSubmission(_)));
    }

    #[test]
    fn test_default_constants() {
        let guard = SubmissionGuard::default();
        assert_eq!(guard.window(), Duration::from_millis(5000));
        assert_eq!(guard.config.capacity, 500);
    }
}
