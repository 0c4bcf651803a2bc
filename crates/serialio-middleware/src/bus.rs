//! Channel-addressed publish/subscribe bus with an atomic set store.
//!
//! [`MessageBus`] is the seam every other component talks through.  Two
//! backends exist:
//!
//! | Backend | Use |
//! |---|---|
//! | [`MemoryBus`] | In-process, built on [`tokio::sync::broadcast`]; tests and single-host demos. |
//! | [`RedisBus`][crate::redis_backend::RedisBus] | Redis `PUBLISH`/`SUBSCRIBE` plus `SADD`/`SREM`/`SISMEMBER`. |
//!
//! Every subscriber of a channel receives every message published to it after
//! it subscribed.  Within one subscription, delivery order equals publish
//! order.  Nothing is persisted or replayed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serialio_types::BusError;
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Publish/subscribe transport plus a shared set store.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from any task.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` verbatim on `channel`.
    ///
    /// Returns the number of subscribers the message was handed to.  Zero
    /// subscribers is a normal condition, not an error.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, BusError>;

    /// Start receiving every message published on `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;

    /// `true` while the backend connection is usable.
    async fn is_connected(&self) -> bool;

    /// Add `member` to `set`.  Returns `true` if it was not already present.
    async fn set_add(&self, set: &str, member: &str) -> Result<bool, BusError>;

    /// Remove `member` from `set`.  Returns `true` if it was present.
    async fn set_remove(&self, set: &str, member: &str) -> Result<bool, BusError>;

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool, BusError>;

    /// Human-readable description of the backend for log lines.
    fn describe(&self) -> String {
        "in-process bus".to_string()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live subscription to one channel.
///
/// Yields raw payload bytes in delivery order.  Dropping the subscription
/// unsubscribes.
pub struct Subscription {
    channel: String,
    stream: BoxStream<'static, Vec<u8>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, stream: BoxStream<'static, Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            stream,
        }
    }

    /// The channel this subscription is bound to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the backend has closed the subscription.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.stream.next().await
    }

    pub fn into_stream(self) -> BoxStream<'static, Vec<u8>> {
        self.stream
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// In-process backend
// ---------------------------------------------------------------------------

/// In-process bus.  Clone it cheaply – all clones share the same channels and
/// sets, the way separate connections share one server.
#[derive(Clone, Debug)]
pub struct MemoryBus {
    inner: Arc<MemoryBusInner>,
}

#[derive(Debug)]
struct MemoryBusInner {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    connected: AtomicBool,
}

impl MemoryBus {
    /// Create a new bus with the given per-channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (a [`broadcast`] channel requirement).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "MemoryBus capacity must be non-zero");
        Self {
            inner: Arc::new(MemoryBusInner {
                capacity,
                channels: Mutex::new(HashMap::new()),
                sets: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate the connection going down (`false`) or coming back (`true`).
    ///
    /// While disconnected every operation fails with
    /// [`BusError::Disconnected`]; existing subscriptions stay attached but
    /// receive nothing because nothing can be published.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::Release);
    }

    /// End every live subscription, the way a dropped pub/sub connection
    /// does.  Later subscriptions work normally.
    pub fn drop_subscriptions(&self) {
        if let Ok(mut channels) = self.inner.channels.lock() {
            channels.clear();
        }
    }

    /// Snapshot of `set`'s members, sorted.
    pub fn members(&self, set: &str) -> Vec<String> {
        let Ok(sets) = self.inner.sets.lock() else {
            return Vec::new();
        };
        let mut members: Vec<String> = sets
            .get(set)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(channel).map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }

    fn ensure_connected(&self) -> Result<(), BusError> {
        if self.inner.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BusError::Disconnected)
        }
    }

    fn channels(&self) -> Result<MutexGuard<'_, HashMap<String, broadcast::Sender<Vec<u8>>>>, BusError> {
        self.inner
            .channels
            .lock()
            .map_err(|e| BusError::Backend(format!("channel table poisoned: {e}")))
    }

    fn sets(&self) -> Result<MutexGuard<'_, HashMap<String, HashSet<String>>>, BusError> {
        self.inner
            .sets
            .lock()
            .map_err(|e| BusError::Backend(format!("set table poisoned: {e}")))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, BusError> {
        self.ensure_connected()?;
        let channels = self.channels()?;
        match channels.get(channel) {
            // SendError only means every receiver has gone away.
            Some(sender) => Ok(sender.send(payload.to_vec()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        self.ensure_connected()?;
        let receiver = {
            let mut channels = self.channels()?;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                .subscribe()
        };

        let name = channel.to_string();
        let messages = stream::unfold(receiver, move |mut receiver| {
            let name = name.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // Subscriber fell behind; log and continue.
                            warn!(channel = %name, lagged_by = n, "subscription lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Subscription::new(channel, messages.boxed()))
    }

    async fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool, BusError> {
        self.ensure_connected()?;
        Ok(self
            .sets()?
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<bool, BusError> {
        self.ensure_connected()?;
        let mut sets = self.sets()?;
        Ok(sets.get_mut(set).is_some_and(|members| members.remove(member)))
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool, BusError> {
        self.ensure_connected()?;
        let sets = self.sets()?;
        Ok(sets.get(set).is_some_and(|members| members.contains(member)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MemoryBus::default();
        let mut sub = bus.subscribe("serial_ports/ttyUSB0/read").await?;

        let delivered = bus.publish("serial_ports/ttyUSB0/read", b"\x00\xffhello").await?;
        assert_eq!(delivered, 1);

        let received = sub.recv().await.ok_or("no message")?;
        assert_eq!(received, b"\x00\xffhello".to_vec());
        assert_eq!(sub.channel(), "serial_ports/ttyUSB0/read");
        Ok(())
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = MemoryBus::default();
        assert_eq!(bus.publish("nobody/listens", b"x").await, Ok(0));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_message() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MemoryBus::default();
        let mut sub1 = bus.subscribe("fanout").await?;
        let mut sub2 = bus.subscribe("fanout").await?;

        bus.publish("fanout", b"one").await?;
        bus.publish("fanout", b"two").await?;

        for sub in [&mut sub1, &mut sub2] {
            assert_eq!(sub.recv().await.as_deref(), Some(&b"one"[..]));
            assert_eq!(sub.recv().await.as_deref(), Some(&b"two"[..]));
        }
        Ok(())
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_channel() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MemoryBus::default();
        let mut write_sub = bus.subscribe("serial_ports/a/write").await?;
        let _command_sub = bus.subscribe("serial_ports/a/command").await?;

        bus.publish("serial_ports/a/command", b"shutdown").await?;

        let result = tokio::time::timeout(Duration::from_millis(50), write_sub.recv()).await;
        assert!(result.is_err(), "write subscriber must not see command traffic");
        Ok(())
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MemoryBus::default();
        let sub = bus.subscribe("ch").await?;
        assert_eq!(bus.subscriber_count("ch"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("ch"), 0);
        assert_eq!(bus.publish("ch", b"gone").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() -> Result<(), Box<dyn std::error::Error>> {
        const CAPACITY: usize = 4;
        let bus = MemoryBus::new(CAPACITY);
        let mut slow = bus.subscribe("flood").await?;

        for i in 0..32u8 {
            bus.publish("flood", &[i]).await?;
        }

        // The oldest messages were overwritten; the stream resumes at the
        // oldest one still buffered instead of ending.
        let first = slow.recv().await.ok_or("stream ended")?;
        assert_eq!(first, vec![32 - CAPACITY as u8]);
        Ok(())
    }

    #[tokio::test]
    async fn set_operations_are_atomic_per_member() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MemoryBus::default();
        assert!(bus.set_add("serial_ports", "ttyUSB0").await?);
        assert!(!bus.set_add("serial_ports", "ttyUSB0").await?);
        assert!(bus.set_contains("serial_ports", "ttyUSB0").await?);
        assert!(!bus.set_contains("serial_ports", "ttyUSB1").await?);
        assert_eq!(bus.members("serial_ports"), vec!["ttyUSB0".to_string()]);

        assert!(bus.set_remove("serial_ports", "ttyUSB0").await?);
        assert!(!bus.set_remove("serial_ports", "ttyUSB0").await?);
        assert!(!bus.set_contains("serial_ports", "ttyUSB0").await?);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_subscriptions_end_their_streams() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MemoryBus::default();
        let mut old = bus.subscribe("ch").await?;

        bus.drop_subscriptions();
        assert_eq!(old.recv().await, None);
        assert_eq!(bus.subscriber_count("ch"), 0);

        let mut fresh = bus.subscribe("ch").await?;
        bus.publish("ch", b"again").await?;
        assert_eq!(fresh.recv().await, Some(b"again".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn disconnected_bus_rejects_operations() {
        let bus = MemoryBus::default();
        bus.set_connected(false);
        assert!(!bus.is_connected().await);
        assert_eq!(bus.publish("ch", b"x").await, Err(BusError::Disconnected));
        assert!(bus.subscribe("ch").await.is_err());
        assert_eq!(bus.set_add("s", "m").await, Err(BusError::Disconnected));

        bus.set_connected(true);
        assert!(bus.is_connected().await);
        assert_eq!(bus.publish("ch", b"x").await, Ok(0));
    }
}
