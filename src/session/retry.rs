//! Retry/backoff controller for failed session fetches
//!
//! Tracks consecutive failures, computes capped exponential delays, and
//! owns the single pending retry timer. Arming a new cycle always cancels
//! the previous timer so at most one scheduled re-fetch exists.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::RetryConfig;

/// Outcome of recording one more consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Arm one timer for `delay`, then re-attempt.
    Schedule { delay: Duration, attempts: u32 },
    /// Budget spent; manual refresh only.
    Exhausted { attempts: u32 },
}

pub(crate) struct RetryController {
    config: RetryConfig,
    attempts: AtomicU32,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RetryController {
    pub(crate) fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: AtomicU32::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Delay before retry attempt `n` (1-indexed): capped exponential
    /// growth from the base delay.
    pub(crate) fn backoff_delay(config: &RetryConfig, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(20);
        config
            .max_delay_ms
            .min(config.base_delay_ms.saturating_mul(1u64 << exponent))
    }

    /// Record a consecutive failure and decide what happens next.
    pub(crate) fn record_failure(&self) -> RetryDecision {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.config.max_retries {
            RetryDecision::Exhausted { attempts: attempt }
        } else {
            RetryDecision::Schedule {
                delay: Duration::from_millis(Self::backoff_delay(&self.config, attempt)),
                attempts: attempt,
            }
        }
    }

    /// Cancel any pending timer. Synchronous; an already-scheduled callback
    /// will not fire after this returns.
    pub(crate) fn cancel_pending(&self) {
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
        }
    }

    /// Replace the pending timer, cancelling the previous one.
    pub(crate) fn arm(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.lock_timer().replace(handle) {
            previous.abort();
        }
    }

    /// Drop the stored handle without aborting. Called by the timer task
    /// itself right before it runs the retry, so a later cancel cannot
    /// abort the in-flight fetch.
    pub(crate) fn disarm(&self) {
        self.lock_timer().take();
    }

    /// A fetch succeeded: clear the failure run and any pending timer.
    pub(crate) fn reset(&self) {
        self.cancel_pending();
        self.attempts.store(0, Ordering::SeqCst);
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
