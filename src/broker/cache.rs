//! Measurement ingestion
//!
//! The cache listens on the measurement topic, stores every reading in the
//! retention buffer and acknowledges it with a `Confirmation` on the system
//! topic.

use crate::broker::error::BrokerResult;
use crate::broker::retention::SharedRetention;
use crate::broker::types::BrokerCounters;
use crate::metrics::recorder;
use crate::protocol::{self, Confirmation, MeasurementRecord, SystemMessage};
use crate::transport::{Envelope, PubSub, SubscriptionId, Topics};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Running {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

#[derive(Clone)]
struct CacheContext {
    bus: Arc<dyn PubSub>,
    topics: Topics,
    retention: SharedRetention,
    counters: Arc<BrokerCounters>,
}

pub struct Cache {
    ctx: CacheContext,
    running: Mutex<Option<Running>>,
}

impl Cache {
    pub(crate) fn new(
        bus: Arc<dyn PubSub>,
        topics: Topics,
        retention: SharedRetention,
        counters: Arc<BrokerCounters>,
    ) -> Self {
        Self {
            ctx: CacheContext {
                bus,
                topics,
                retention,
                counters,
            },
            running: Mutex::new(None),
        }
    }

    /// Subscribe to the measurement topic. Calling it twice is a no-op.
    pub async fn start(&self) -> BrokerResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let mut subscription = self.ctx.bus.subscribe(&self.ctx.topics.measurement).await?;
        let id = subscription.id;
        let ctx = self.ctx.clone();

        let task = tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                ctx.handle(envelope).await;
            }
        });

        *running = Some(Running {
            subscription: id,
            task,
        });

        info!(
            publisher_id = %self.ctx.bus.publisher_id(),
            topic = %self.ctx.topics.measurement,
            "Cache started"
        );
        Ok(())
    }

    /// Stop ingesting. Safe to call when not started.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.task.abort();
        if let Err(e) = self.ctx.bus.unsubscribe(running.subscription).await {
            warn!(error = %e, "Cache unsubscribe failed");
        }

        info!(publisher_id = %self.ctx.bus.publisher_id(), "Cache stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

impl CacheContext {
    async fn handle(&self, envelope: Envelope) {
        let measurement = match protocol::decode(&envelope.content) {
            Ok(SystemMessage::Measurement(m)) => m,
            Ok(other) => {
                debug!(message_type = ?other.message_type(), "Ignoring non-measurement message");
                return;
            }
            Err(e) => {
                warn!(error = %e, publisher_id = %envelope.metadata.publisher_id, "Undecodable measurement");
                return;
            }
        };

        let sensor_id = measurement.sensor_id.clone();
        let signature = envelope.metadata.signature.clone();

        let (evicted, retained) = {
            let mut buffer = self.retention.write();
            let evicted = buffer.ingest(MeasurementRecord::new(measurement, envelope.metadata));
            (evicted, buffer.len())
        };

        let seq_num = self.counters.records_ingested.fetch_add(1, Ordering::Relaxed) + 1;
        recorder::record_ingested(retained);
        if evicted > 0 {
            recorder::record_evicted(evicted);
        }

        let confirmation = SystemMessage::from(Confirmation {
            sensor_id,
            seq_num,
            signature,
        });

        if let Err(e) = self.publish(&confirmation).await {
            warn!(error = %e, seq_num, "Failed to publish confirmation");
            return;
        }

        BrokerCounters::incr(&self.counters.confirmations_published, 1);
        recorder::record_confirmation_published();
    }

    async fn publish(&self, message: &SystemMessage) -> BrokerResult<()> {
        let bytes = protocol::encode(message)?;
        self.bus.publish(&self.topics.system, bytes).await?;
        Ok(())
    }
}
