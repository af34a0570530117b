use crate::protocol::MessageMetadata;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Logical channels, one per role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    /// Control traffic: recovery requests and confirmations
    pub system: String,

    /// Raw sensor readings
    pub measurement: String,

    /// Recovery replies
    pub recovery: String,
}

impl Topics {
    /// Derive the three topic names from a common base address
    pub fn with_base(base: &str) -> Self {
        Self {
            system: format!("{base}/system"),
            measurement: format!("{base}/measurement"),
            recovery: format!("{base}/recovery"),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::with_base("sensorstream")
    }
}

/// Handle identifying one subscription on a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A delivered message: raw content plus transport metadata
#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: String,
    pub content: Bytes,
    pub metadata: MessageMetadata,
}

/// Receiving end of a subscription.
///
/// Envelopes arrive in publication order per publisher. Each subscription is
/// drained by exactly one task, which gives handlers serialized delivery.
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: String,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        topic: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            receiver,
        }
    }

    /// Next envelope, or `None` once the transport dropped the subscription
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_with_base() {
        let topics = Topics::with_base("0xabc");
        assert_eq!(topics.system, "0xabc/system");
        assert_eq!(topics.measurement, "0xabc/measurement");
        assert_eq!(topics.recovery, "0xabc/recovery");
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }
}
