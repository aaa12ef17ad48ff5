//! Cross-context session broadcast
//!
//! Delivers [`SessionEvent`]s to every other subscribed context in the same
//! process, with graceful degradation: the native transport fans out over a
//! process-wide `tokio::sync::broadcast` sender per channel name; when no
//! async runtime is available the channel falls back to in-memory listener
//! fan-out. Callers observe no behavioral difference beyond the reported
//! [`ChannelMode`].

mod event;
mod registry;

pub use event::SessionEvent;
pub use registry::{reset_session_channel, session_channel};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use std::sync::OnceLock;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Buffered events per native transport before slow receivers lag.
const TRANSPORT_CAPACITY: usize = 64;

/// Which transport the channel is using. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Native,
    InMemory,
}

type Listener = Arc<dyn Fn(SessionEvent) + Send + Sync>;
type ListenerSet = Arc<Mutex<Vec<(u64, Listener)>>>;

#[derive(Debug, Clone)]
struct Envelope {
    sender: Uuid,
    event: SessionEvent,
}

/// Process-wide transport registry, one sender per channel name.
///
/// Senders are shared by every channel instance with the same name; they are
/// intentionally never removed, since a late subscriber must reach earlier
/// broadcasters.
fn transports() -> &'static DashMap<String, broadcast::Sender<Envelope>> {
    static TRANSPORTS: OnceLock<DashMap<String, broadcast::Sender<Envelope>>> = OnceLock::new();
    TRANSPORTS.get_or_init(DashMap::new)
}

/// A named session broadcast channel.
///
/// Best-effort, same-process delivery; no acknowledgement. With the native
/// transport an instance never receives its own broadcasts; the in-memory
/// fallback delivers in-process, including to the sender's own listeners.
pub struct SessionChannel {
    name: String,
    mode: ChannelMode,
    instance_id: Uuid,
    listeners: ListenerSet,
    next_listener_id: AtomicU64,
    closed: AtomicBool,
    transport: Option<broadcast::Sender<Envelope>>,
    dispatch: Mutex<Option<tokio::task::JoinHandle<()>>>,
    total_broadcasts: AtomicU64,
}

impl SessionChannel {
    /// Create a channel, preferring the native transport.
    ///
    /// Falls back to in-memory fan-out when called outside a tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if tokio::runtime::Handle::try_current().is_ok() {
            Self::native(name)
        } else {
            Self::in_memory(name)
        }
    }

    fn native(name: String) -> Self {
        let sender = transports()
            .entry(name.clone())
            .or_insert_with(|| broadcast::channel(TRANSPORT_CAPACITY).0)
            .clone();

        let channel = Self {
            name,
            mode: ChannelMode::Native,
            instance_id: Uuid::new_v4(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            transport: Some(sender.clone()),
            dispatch: Mutex::new(None),
            total_broadcasts: AtomicU64::new(0),
        };

        let mut rx = sender.subscribe();
        let listeners = channel.listeners.clone();
        let own_id = channel.instance_id;
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        // Native transport never re-delivers to the sender.
                        if envelope.sender == own_id {
                            continue;
                        }
                        dispatch_to(&listeners, envelope.event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            target: "session.channel",
                            skipped,
                            "Broadcast receiver lagged, events dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *lock(&channel.dispatch) = Some(handle);

        channel
    }

    /// Create a channel on the in-memory fallback transport.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: ChannelMode::InMemory,
            instance_id: Uuid::new_v4(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            transport: None,
            dispatch: Mutex::new(None),
            total_broadcasts: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Total events broadcast from this instance.
    pub fn broadcast_count(&self) -> u64 {
        self.total_broadcasts.load(Ordering::Relaxed)
    }

    /// Register a listener invoked once per event received from any source.
    ///
    /// Dropping (or `cancel`ing) the returned [`Subscription`] unregisters
    /// the listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver an event to all other subscribed contexts. No-op after close.
    pub fn broadcast(&self, event: SessionEvent) {
        if self.is_closed() {
            tracing::debug!(
                target: "session.channel",
                channel = %self.name,
                "Broadcast on closed channel ignored"
            );
            return;
        }

        self.total_broadcasts.fetch_add(1, Ordering::Relaxed);

        match &self.transport {
            Some(sender) => {
                // Errors only mean no receivers exist yet; best-effort.
                let _ = sender.send(Envelope {
                    sender: self.instance_id,
                    event,
                });
            }
            None => dispatch_to(&self.listeners, event),
        }
    }

    /// Release the transport and unregister all listeners. Idempotent and
    /// safe to call from any cleanup handler without coordination.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = lock(&self.dispatch).take() {
            handle.abort();
        }
        lock(&self.listeners).clear();
        tracing::debug!(target: "session.channel", channel = %self.name, "Channel closed");
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to a registered listener; unregisters on drop.
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Vec<(u64, Listener)>>>,
}

impl Subscription {
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

fn dispatch_to(listeners: &ListenerSet, event: SessionEvent) {
    // Snapshot under the lock, invoke outside it: a listener may subscribe
    // or unsubscribe reentrantly.
    let snapshot: Vec<Listener> = lock(listeners).iter().map(|(_, l)| l.clone()).collect();
    for listener in snapshot {
        listener(event.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn signed_out(origin: &str) -> SessionEvent {
        SessionEvent::SignedOut {
            origin: Some(origin.to_string()),
        }
    }

    #[test]
    fn test_in_memory_delivers_to_own_listeners() {
        let channel = SessionChannel::in_memory("test.in-memory");
        assert_eq!(channel.mode(), ChannelMode::InMemory);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = channel.subscribe(move |event| {
            lock(&seen_clone).push(event);
        });

        channel.broadcast(signed_out("tab-a"));

        let events = lock(&seen);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin(), Some("tab-a"));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let channel = SessionChannel::in_memory("test.unsub");
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let sub = channel.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        channel.broadcast(signed_out("a"));
        sub.cancel();
        channel.broadcast(signed_out("b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_is_idempotent_and_silences_broadcast() {
        let channel = SessionChannel::in_memory("test.close");
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _sub = channel.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        channel.close();
        channel.close();
        channel.broadcast(signed_out("a"));

        assert!(channel.is_closed());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_native_fans_out_between_instances() {
        let a = SessionChannel::new("test.native.fanout");
        let b = SessionChannel::new("test.native.fanout");
        assert_eq!(a.mode(), ChannelMode::Native);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = b.subscribe(move |event| {
            lock(&seen_clone).push(event);
        });

        a.broadcast(signed_out("tab-a"));

        // Delivery hops through the dispatch task.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = lock(&seen);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin(), Some("tab-a"));
    }

    #[tokio::test]
    async fn test_native_never_delivers_to_sender() {
        let a = SessionChannel::new("test.native.self");
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _sub = a.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        a.broadcast(signed_out("tab-a"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(a.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_instance_stops_receiving() {
        let a = SessionChannel::new("test.native.closed-rx");
        let b = SessionChannel::new("test.native.closed-rx");

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _sub = b.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        b.close();
        a.broadcast(signed_out("tab-a"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
