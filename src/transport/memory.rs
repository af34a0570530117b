//! In-process pub/sub bus
//!
//! Every node holds a `BusClient` bound to its own identity. Publications are
//! stamped with metadata and fanned out to all live subscribers of the topic
//! through unbounded channels, so delivery never blocks the publisher and stays
//! in publication order per publisher.

use crate::protocol::{MessageMetadata, PublisherId};
use crate::transport::bus::PubSub;
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::types::{now_millis, Envelope, Subscription, SubscriptionId};
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Shared bus connecting every node of one process
pub struct MemoryBus {
    topics: DashMap<String, Vec<Subscriber>>,
    next_subscription: AtomicU64,
    closed: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
}

/// Counters for a bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub subscriptions: usize,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        })
    }

    /// Client publishing under `identity`
    pub fn client(self: &Arc<Self>, identity: impl Into<PublisherId>) -> BusClient {
        BusClient {
            bus: self.clone(),
            identity: identity.into(),
        }
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            subscriptions: self.topics.iter().map(|e| e.value().len()).sum(),
        }
    }

    /// Close the bus: every subscription ends and later operations fail
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn register(&self, topic: &str) -> TransportResult<Subscription> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, tx });

        Ok(Subscription::new(id, topic, rx))
    }

    fn deregister(&self, id: SubscriptionId) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        for mut entry in self.topics.iter_mut() {
            let subs = entry.value_mut();
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.swap_remove(pos);
                return Ok(());
            }
        }

        Err(TransportError::UnknownSubscription(id.0))
    }

    fn deliver(&self, topic: &str, content: Bytes, metadata: MessageMetadata) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        self.published.fetch_add(1, Ordering::Relaxed);

        let Some(mut subs) = self.topics.get_mut(topic) else {
            return Ok(());
        };

        // Receivers dropped without unsubscribing are pruned here
        subs.retain(|s| !s.tx.is_closed());

        for sub in subs.iter() {
            let envelope = Envelope {
                topic: topic.to_string(),
                content: content.clone(),
                metadata: metadata.clone(),
            };
            if sub.tx.send(envelope).is_ok() {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }
}

/// A node's handle on the bus
#[derive(Clone)]
pub struct BusClient {
    bus: Arc<MemoryBus>,
    identity: PublisherId,
}

impl BusClient {
    pub fn bus(&self) -> &Arc<MemoryBus> {
        &self.bus
    }

    fn sign(&self, timestamp: u64, payload: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.identity.as_str().as_bytes());
        hasher.update(&timestamp.to_be_bytes());
        hasher.update(payload);
        hex::encode(hasher.finalize().as_bytes())
    }
}

impl PubSub for BusClient {
    fn publisher_id(&self) -> &PublisherId {
        &self.identity
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, TransportResult<Subscription>> {
        Box::pin(async move { self.bus.register(topic) })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move { self.bus.deregister(id) })
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: Bytes,
    ) -> BoxFuture<'a, TransportResult<()>> {
        Box::pin(async move {
            let timestamp = now_millis();
            let signature = self.sign(timestamp, &payload);
            let metadata = MessageMetadata::new(self.identity.clone(), timestamp, signature);
            self.bus.deliver(topic, payload, metadata)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = MemoryBus::new();
        let alice = bus.client("alice");
        let bob = bus.client("bob");

        let mut sub_a = alice.subscribe("t").await.unwrap();
        let mut sub_b = bob.subscribe("t").await.unwrap();

        bob.publish("t", Bytes::from_static(b"hello")).await.unwrap();

        let a = sub_a.recv().await.unwrap();
        let b = sub_b.recv().await.unwrap();
        assert_eq!(a.content, Bytes::from_static(b"hello"));
        assert_eq!(a.metadata.publisher_id, PublisherId::new("bob"));
        assert_eq!(a.metadata, b.metadata);
        assert_eq!(a.metadata.signature.len(), 64);
    }

    #[tokio::test]
    async fn test_per_publisher_order() {
        let bus = MemoryBus::new();
        let client = bus.client("p");
        let mut sub = client.subscribe("t").await.unwrap();

        for i in 0..100u32 {
            client
                .publish("t", Bytes::from(i.to_string()))
                .await
                .unwrap();
        }

        for i in 0..100u32 {
            let env = sub.recv().await.unwrap();
            assert_eq!(env.content, Bytes::from(i.to_string()));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_is_an_error() {
        let bus = MemoryBus::new();
        let client = bus.client("p");
        let sub = client.subscribe("t").await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 1);

        client.unsubscribe(sub.id).await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 0);

        let again = client.unsubscribe(sub.id).await;
        assert!(matches!(again, Err(TransportError::UnknownSubscription(_))));
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_operations() {
        let bus = MemoryBus::new();
        let client = bus.client("p");
        let mut sub = client.subscribe("t").await.unwrap();

        bus.close();

        assert!(sub.recv().await.is_none());
        assert!(matches!(
            client.publish("t", Bytes::new()).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            client.subscribe("t").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = MemoryBus::new();
        let client = bus.client("p");
        let _sub1 = client.subscribe("t").await.unwrap();
        let _sub2 = client.subscribe("t").await.unwrap();

        client.publish("t", Bytes::new()).await.unwrap();
        client.publish("other", Bytes::new()).await.unwrap();

        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.subscriptions, 2);
    }
}
