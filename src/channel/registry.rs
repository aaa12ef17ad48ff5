//! Process-wide channel cache
//!
//! Repeated requests for the same channel name return the same instance;
//! requesting a different name closes the cached instance and creates a new
//! one. The cache lazily recreates a closed channel on next access.

use std::sync::{Arc, Mutex, PoisonError};

use super::SessionChannel;

static CACHE: Mutex<Option<Arc<SessionChannel>>> = Mutex::new(None);

/// Get or create the shared channel for `name`.
pub fn session_channel(name: &str) -> Arc<SessionChannel> {
    let mut cache = CACHE.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(cached) = cache.as_ref() {
        if cached.name() == name && !cached.is_closed() {
            return cached.clone();
        }
        cached.close();
    }

    let channel = Arc::new(SessionChannel::new(name));
    *cache = Some(channel.clone());
    channel
}

/// Close and drop the cached channel. Intended for teardown paths and test
/// hygiene; the next [`session_channel`] call recreates it.
pub fn reset_session_channel() {
    let mut cache = CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(cached) = cache.take() {
        cached.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Serialized because the cache is process-wide state shared across
    // the test binary's threads.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn test_same_name_returns_same_instance() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(PoisonError::into_inner);
        reset_session_channel();

        let a = session_channel("registry.same");
        let b = session_channel("registry.same");
        assert!(Arc::ptr_eq(&a, &b));

        reset_session_channel();
    }

    #[tokio::test]
    async fn test_different_name_closes_previous() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(PoisonError::into_inner);
        reset_session_channel();

        let first = session_channel("registry.first");
        let second = session_channel("registry.second");

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(second.name(), "registry.second");

        reset_session_channel();
    }

    #[tokio::test]
    async fn test_closed_cached_channel_is_recreated() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(PoisonError::into_inner);
        reset_session_channel();

        let first = session_channel("registry.reopen");
        first.close();

        let second = session_channel("registry.reopen");
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());

        reset_session_channel();
    }
}
