use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of a node publishing on the bus (sensor, broker or validator)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublisherId(String);

impl PublisherId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identity, used when a node is not given one explicitly
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublisherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PublisherId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PublisherId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Delivery metadata attached by the transport to every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub publisher_id: PublisherId,
    /// Publication time in milliseconds since the Unix epoch
    pub timestamp: u64,
    pub signature: String,
}

impl MessageMetadata {
    pub fn new(publisher_id: PublisherId, timestamp: u64, signature: impl Into<String>) -> Self {
        Self {
            publisher_id,
            timestamp,
            signature: signature.into(),
        }
    }
}

/// Message type discriminant, second element of every encoded message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Measurement = 0,
    Confirmation = 1,
    RecoveryRequest = 2,
    RecoveryResponse = 3,
    RecoveryComplete = 4,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::Measurement),
            1 => Some(MessageType::Confirmation),
            2 => Some(MessageType::RecoveryRequest),
            3 => Some(MessageType::RecoveryResponse),
            4 => Some(MessageType::RecoveryComplete),
            _ => None,
        }
    }
}

/// A single sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub sensor_id: String,
    pub seq_num: u64,
    pub pressure: f64,
    pub temperature: f64,
}

/// Broker acknowledgement of an ingested measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub sensor_id: String,
    /// Per-broker ingestion counter
    pub seq_num: u64,
    /// Signature of the confirmed measurement
    pub signature: String,
}

/// Broadcast request for history in `[from, to)`; `to == 0` is unbounded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub request_id: String,
    pub from: u64,
    pub to: u64,
}

/// A measurement together with the metadata it was delivered with.
///
/// Immutable once stored. Retention and replay share records through `Arc`
/// so a response page never copies the underlying reading.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub message: Measurement,
    pub metadata: MessageMetadata,
}

impl MeasurementRecord {
    pub fn new(message: Measurement, metadata: MessageMetadata) -> Self {
        Self { message, metadata }
    }

    pub fn timestamp(&self) -> u64 {
        self.metadata.timestamp
    }
}

/// One page of replayed history
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryResponse {
    pub request_id: String,
    pub seq_num: u64,
    pub payload: Vec<Arc<MeasurementRecord>>,
}

/// Terminal marker of one broker's answer to one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryComplete {
    pub request_id: String,
    pub seq_num: u64,
    pub is_fulfilled: bool,
}

/// Closed set of messages exchanged on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum SystemMessage {
    Measurement(Measurement),
    Confirmation(Confirmation),
    RecoveryRequest(RecoveryRequest),
    RecoveryResponse(RecoveryResponse),
    RecoveryComplete(RecoveryComplete),
}

impl SystemMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            SystemMessage::Measurement(_) => MessageType::Measurement,
            SystemMessage::Confirmation(_) => MessageType::Confirmation,
            SystemMessage::RecoveryRequest(_) => MessageType::RecoveryRequest,
            SystemMessage::RecoveryResponse(_) => MessageType::RecoveryResponse,
            SystemMessage::RecoveryComplete(_) => MessageType::RecoveryComplete,
        }
    }

    /// Round identifier for recovery replies, `None` for everything else
    pub fn recovery_request_id(&self) -> Option<&str> {
        match self {
            SystemMessage::RecoveryResponse(r) => Some(&r.request_id),
            SystemMessage::RecoveryComplete(c) => Some(&c.request_id),
            _ => None,
        }
    }
}

impl From<Measurement> for SystemMessage {
    fn from(m: Measurement) -> Self {
        SystemMessage::Measurement(m)
    }
}

impl From<Confirmation> for SystemMessage {
    fn from(c: Confirmation) -> Self {
        SystemMessage::Confirmation(c)
    }
}

impl From<RecoveryRequest> for SystemMessage {
    fn from(r: RecoveryRequest) -> Self {
        SystemMessage::RecoveryRequest(r)
    }
}

impl From<RecoveryResponse> for SystemMessage {
    fn from(r: RecoveryResponse) -> Self {
        SystemMessage::RecoveryResponse(r)
    }
}

impl From<RecoveryComplete> for SystemMessage {
    fn from(c: RecoveryComplete) -> Self {
        SystemMessage::RecoveryComplete(c)
    }
}
