//! Session metrics
//!
//! Lightweight atomic counters snapshotted on demand. The snapshot is the
//! surface exposed to test harnesses; there is no backend exporter here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub(crate) struct SessionMetrics {
    refresh_attempts: AtomicU64,
    refresh_failures: AtomicU64,
    redirects: AtomicU64,
    last_fetch_ms: AtomicU64,
}

impl SessionMetrics {
    pub(crate) fn new() -> Self {
        Self {
            refresh_attempts: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
            redirects: AtomicU64::new(0),
            last_fetch_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.refresh_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redirect(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch_latency(&self, elapsed: Duration) {
        self.last_fetch_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SessionMetricSnapshot {
        SessionMetricSnapshot {
            generated_at: Utc::now(),
            refresh_attempts: self.refresh_attempts.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            redirects: self.redirects.load(Ordering::Relaxed),
            last_fetch_ms: self.last_fetch_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the store's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMetricSnapshot {
    pub generated_at: DateTime<Utc>,
    pub refresh_attempts: u64,
    pub refresh_failures: u64,
    pub redirects: u64,
    pub last_fetch_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = SessionMetrics::new();
        metrics.record_attempt();
        metrics.record_attempt();
        metrics.record_failure();
        metrics.record_redirect();
        metrics.record_fetch_latency(Duration::from_millis(42));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.refresh_attempts, 2);
        assert_eq!(snapshot.refresh_failures, 1);
        assert_eq!(snapshot.redirects, 1);
        assert_eq!(snapshot.last_fetch_ms, 42);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = SessionMetrics::new();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["refresh_attempts"], 0);
        assert!(json["generated_at"].is_string());
    }
}
