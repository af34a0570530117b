//! Shared helpers for integration tests
//!
//! `RecordingBus` counts what a node does on the bus, `LossyBus` drops a
//! share of publications on one topic, and `FakeBroker` lets a test script
//! recovery replies by hand.

#![allow(dead_code)]

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sensorstream::protocol::{
    self, Measurement, MeasurementRecord, MessageMetadata, PublisherId, RecoveryComplete,
    RecoveryRequest, RecoveryResponse, SystemMessage,
};
use sensorstream::transport::{
    BusClient, PubSub, Subscription, SubscriptionId, Topics, TransportResult,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Let spawned tasks drain their queues
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn record(sensor: &str, seq_num: u64, timestamp: u64) -> MeasurementRecord {
    MeasurementRecord::new(
        Measurement {
            sensor_id: sensor.to_string(),
            seq_num,
            pressure: 1000.0 + (seq_num % 10) as f64,
            temperature: 100.0 + (seq_num % 50) as f64,
        },
        MessageMetadata::new(PublisherId::new(sensor), timestamp, format!("sig-{seq_num}")),
    )
}

pub async fn publish(client: &dyn PubSub, topic: &str, message: impl Into<SystemMessage>) {
    let bytes = protocol::encode(&message.into()).unwrap();
    client.publish(topic, bytes).await.unwrap();
}

/// Collect everything currently queued on a subscription
pub async fn drain(subscription: &mut Subscription) -> Vec<SystemMessage> {
    let mut out = Vec::new();
    while let Ok(Some(envelope)) =
        tokio::time::timeout(Duration::from_millis(10), subscription.recv()).await
    {
        out.push(protocol::decode(&envelope.content).unwrap());
    }
    out
}

/// Records publications and unsubscribes of the wrapped client
pub struct RecordingBus {
    inner: BusClient,
    published: Mutex<Vec<(String, Bytes)>>,
    unsubscribes: AtomicUsize,
}

impl RecordingBus {
    pub fn new(inner: BusClient) -> Arc<Self> {
        Arc::new(Self {
            inner,
            published: Mutex::new(Vec::new()),
            unsubscribes: AtomicUsize::new(0),
        })
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Recovery requests published so far, oldest first
    pub fn requests(&self) -> Vec<RecoveryRequest> {
        self.published
            .lock()
            .iter()
            .filter_map(|(_, bytes)| match protocol::decode(bytes) {
                Ok(SystemMessage::RecoveryRequest(r)) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn last_request(&self) -> RecoveryRequest {
        self.requests().pop().expect("no recovery request published")
    }
}

impl PubSub for RecordingBus {
    fn publisher_id(&self) -> &PublisherId {
        self.inner.publisher_id()
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, TransportResult<Subscription>> {
        self.inner.subscribe(topic)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, TransportResult<()>> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(id)
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: Bytes) -> BoxFuture<'a, TransportResult<()>> {
        self.published
            .lock()
            .push((topic.to_string(), payload.clone()));
        self.inner.publish(topic, payload)
    }
}

/// Configuration for the lossy bus
#[derive(Debug, Clone)]
pub struct LossyBusConfig {
    /// Drop probability (0.0 - 1.0)
    pub loss_rate: f32,
    /// Only publications on this topic are dropped
    pub topic: String,
    pub seed: u64,
}

/// Silently drops a share of publications, as a flaky link would
pub struct LossyBus {
    inner: BusClient,
    config: LossyBusConfig,
    rng: Mutex<StdRng>,
    sent: AtomicU64,
    lost: AtomicU64,
}

impl LossyBus {
    pub fn new(inner: BusClient, config: LossyBusConfig) -> Self {
        Self {
            inner,
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            sent: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }

    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl PubSub for LossyBus {
    fn publisher_id(&self) -> &PublisherId {
        self.inner.publisher_id()
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, TransportResult<Subscription>> {
        self.inner.subscribe(topic)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, TransportResult<()>> {
        self.inner.unsubscribe(id)
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: Bytes) -> BoxFuture<'a, TransportResult<()>> {
        if topic == self.config.topic {
            self.sent.fetch_add(1, Ordering::Relaxed);
            if self.rng.lock().gen::<f32>() < self.config.loss_rate {
                self.lost.fetch_add(1, Ordering::Relaxed);
                return Box::pin(async { Ok(()) });
            }
        }
        self.inner.publish(topic, payload)
    }
}

/// Scripted broker replying on the recovery topic
pub struct FakeBroker {
    client: BusClient,
    topics: Topics,
}

impl FakeBroker {
    pub fn new(client: BusClient, topics: Topics) -> Self {
        Self { client, topics }
    }

    pub fn id(&self) -> PublisherId {
        self.client.publisher_id().clone()
    }

    pub async fn page(&self, request_id: &str, seq_num: u64, records: Vec<MeasurementRecord>) {
        let response = RecoveryResponse {
            request_id: request_id.to_string(),
            seq_num,
            payload: records.into_iter().map(Arc::new).collect(),
        };
        publish(&self.client, &self.topics.recovery, response).await;
    }

    pub async fn complete(&self, request_id: &str, seq_num: u64, is_fulfilled: bool) {
        let complete = RecoveryComplete {
            request_id: request_id.to_string(),
            seq_num,
            is_fulfilled,
        };
        publish(&self.client, &self.topics.recovery, complete).await;
    }
}
