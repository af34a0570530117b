//! Broker node
//!
//! A broker retains a recent window of measurements and replays it to
//! consumers that ask for recovery.

use crate::broker::cache::Cache;
use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::responder::RecoveryResponder;
use crate::broker::retention::{RetentionBuffer, SharedRetention};
use crate::broker::types::{BrokerConfig, BrokerCounters, BrokerStats};
use crate::protocol::PublisherId;
use crate::transport::{PubSub, Topics};
use std::sync::Arc;
use tracing::info;

pub struct Broker {
    id: PublisherId,
    retention: SharedRetention,
    counters: Arc<BrokerCounters>,
    cache: Cache,
    responder: RecoveryResponder,
}

impl Broker {
    pub fn new(bus: Arc<dyn PubSub>, topics: Topics, config: BrokerConfig) -> BrokerResult<Self> {
        if config.retention.capacity == 0 {
            return Err(BrokerError::InvalidConfig(
                "retention capacity must be positive".into(),
            ));
        }
        if config.responder.page_size == 0 || config.responder.max_pages == 0 {
            return Err(BrokerError::InvalidConfig(
                "page_size and max_pages must be positive".into(),
            ));
        }

        let id = bus.publisher_id().clone();
        let retention = RetentionBuffer::shared(config.retention.capacity);
        let counters = Arc::new(BrokerCounters::default());

        let cache = Cache::new(
            bus.clone(),
            topics.clone(),
            retention.clone(),
            counters.clone(),
        );
        let responder = RecoveryResponder::new(
            bus,
            topics,
            retention.clone(),
            config.responder,
            counters.clone(),
        );

        Ok(Self {
            id,
            retention,
            counters,
            cache,
            responder,
        })
    }

    pub fn id(&self) -> &PublisherId {
        &self.id
    }

    pub async fn start(&self) -> BrokerResult<()> {
        self.cache.start().await?;
        if let Err(e) = self.responder.start().await {
            self.cache.stop().await;
            return Err(e);
        }
        info!(broker = %self.id, "Broker started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.responder.stop().await;
        self.cache.stop().await;
        info!(broker = %self.id, "Broker stopped");
    }

    pub fn retention(&self) -> &SharedRetention {
        &self.retention
    }

    pub fn responder(&self) -> &RecoveryResponder {
        &self.responder
    }

    pub fn stats(&self) -> BrokerStats {
        let (retained, evicted) = {
            let buffer = self.retention.read();
            (buffer.len() as u64, buffer.evicted_total())
        };

        BrokerStats {
            records_ingested: BrokerCounters::get(&self.counters.records_ingested),
            records_evicted: evicted,
            records_retained: retained,
            confirmations_published: BrokerCounters::get(&self.counters.confirmations_published),
            requests_served: BrokerCounters::get(&self.counters.requests_served),
            pages_sent: BrokerCounters::get(&self.counters.pages_sent),
            replies_truncated: BrokerCounters::get(&self.counters.replies_truncated),
        }
    }
}
