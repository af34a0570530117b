//! Positional wire encoding
//!
//! Every message is a JSON array `[version, type, ...fields]`. Field order is
//! fixed per `(version, type)` pair and decoding rejects versions it does not
//! know instead of guessing a layout.

use crate::protocol::error::{CodecError, CodecResult};
use crate::protocol::types::{
    Confirmation, Measurement, MeasurementRecord, MessageMetadata, MessageType, PublisherId,
    RecoveryComplete, RecoveryRequest, RecoveryResponse, SystemMessage,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;

/// Version written by `encode`
pub const PROTOCOL_VERSION: u64 = 1;

/// Serialize a message into its wire form
pub fn encode(message: &SystemMessage) -> CodecResult<Bytes> {
    let array = to_array(message);
    Ok(Bytes::from(serde_json::to_vec(&array)?))
}

/// Parse a wire message, validating version and type tag
pub fn decode(bytes: &[u8]) -> CodecResult<SystemMessage> {
    let value: Value = serde_json::from_slice(bytes)?;
    from_array(&value)
}

fn to_array(message: &SystemMessage) -> Value {
    let tag = message.message_type() as u8;
    match message {
        SystemMessage::Measurement(m) => measurement_to_array(m),
        SystemMessage::Confirmation(c) => json!([
            PROTOCOL_VERSION,
            tag,
            c.sensor_id,
            c.seq_num,
            c.signature
        ]),
        SystemMessage::RecoveryRequest(r) => {
            json!([PROTOCOL_VERSION, tag, r.request_id, r.from, r.to])
        }
        SystemMessage::RecoveryResponse(r) => {
            let payload: Vec<Value> = r
                .payload
                .iter()
                .map(|record| {
                    json!([
                        measurement_to_array(&record.message),
                        metadata_to_array(&record.metadata)
                    ])
                })
                .collect();
            json!([PROTOCOL_VERSION, tag, r.request_id, r.seq_num, payload])
        }
        SystemMessage::RecoveryComplete(c) => json!([
            PROTOCOL_VERSION,
            tag,
            c.request_id,
            c.seq_num,
            c.is_fulfilled
        ]),
    }
}

fn measurement_to_array(m: &Measurement) -> Value {
    json!([
        PROTOCOL_VERSION,
        MessageType::Measurement as u8,
        m.sensor_id,
        m.seq_num,
        m.pressure,
        m.temperature
    ])
}

fn metadata_to_array(metadata: &MessageMetadata) -> Value {
    json!([
        metadata.publisher_id.as_str(),
        metadata.timestamp,
        metadata.signature
    ])
}

/// Cursor over the positional fields of one array
struct Fields<'a> {
    items: &'a [Value],
    context: &'static str,
}

impl<'a> Fields<'a> {
    fn new(value: &'a Value, context: &'static str) -> CodecResult<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| CodecError::Malformed(format!("{context}: expected array")))?;
        Ok(Self { items, context })
    }

    fn get(&self, index: usize) -> CodecResult<&'a Value> {
        self.items.get(index).ok_or_else(|| {
            CodecError::Malformed(format!("{}: missing field {}", self.context, index))
        })
    }

    fn invalid(&self, index: usize, expected: &str) -> CodecError {
        CodecError::Malformed(format!(
            "{}: field {} is not {}",
            self.context, index, expected
        ))
    }

    fn string(&self, index: usize) -> CodecResult<String> {
        self.get(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(index, "a string"))
    }

    fn u64(&self, index: usize) -> CodecResult<u64> {
        self.get(index)?
            .as_u64()
            .ok_or_else(|| self.invalid(index, "an unsigned integer"))
    }

    fn f64(&self, index: usize) -> CodecResult<f64> {
        self.get(index)?
            .as_f64()
            .ok_or_else(|| self.invalid(index, "a number"))
    }

    fn bool(&self, index: usize) -> CodecResult<bool> {
        self.get(index)?
            .as_bool()
            .ok_or_else(|| self.invalid(index, "a boolean"))
    }

    fn array(&self, index: usize) -> CodecResult<&'a Vec<Value>> {
        self.get(index)?
            .as_array()
            .ok_or_else(|| self.invalid(index, "an array"))
    }
}

/// Read and validate the `[version, type, ..]` header
fn header(fields: &Fields<'_>) -> CodecResult<MessageType> {
    let version = fields.u64(0)?;
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let tag = fields.u64(1)?;
    u8::try_from(tag)
        .ok()
        .and_then(MessageType::from_u8)
        .ok_or(CodecError::UnknownMessageType(tag))
}

fn from_array(value: &Value) -> CodecResult<SystemMessage> {
    let fields = Fields::new(value, "message")?;
    let message = match header(&fields)? {
        MessageType::Measurement => SystemMessage::Measurement(measurement_fields(&fields)?),
        MessageType::Confirmation => SystemMessage::Confirmation(Confirmation {
            sensor_id: fields.string(2)?,
            seq_num: fields.u64(3)?,
            signature: fields.string(4)?,
        }),
        MessageType::RecoveryRequest => SystemMessage::RecoveryRequest(RecoveryRequest {
            request_id: fields.string(2)?,
            from: fields.u64(3)?,
            to: fields.u64(4)?,
        }),
        MessageType::RecoveryResponse => {
            let payload = fields
                .array(4)?
                .iter()
                .map(record_from_pair)
                .collect::<CodecResult<Vec<_>>>()?;
            SystemMessage::RecoveryResponse(RecoveryResponse {
                request_id: fields.string(2)?,
                seq_num: fields.u64(3)?,
                payload,
            })
        }
        MessageType::RecoveryComplete => SystemMessage::RecoveryComplete(RecoveryComplete {
            request_id: fields.string(2)?,
            seq_num: fields.u64(3)?,
            is_fulfilled: fields.bool(4)?,
        }),
    };
    Ok(message)
}

fn measurement_fields(fields: &Fields<'_>) -> CodecResult<Measurement> {
    Ok(Measurement {
        sensor_id: fields.string(2)?,
        seq_num: fields.u64(3)?,
        pressure: fields.f64(4)?,
        temperature: fields.f64(5)?,
    })
}

fn record_from_pair(value: &Value) -> CodecResult<Arc<MeasurementRecord>> {
    let pair = Fields::new(value, "payload entry")?;

    let message = Fields::new(pair.get(0)?, "payload message")?;
    match header(&message)? {
        MessageType::Measurement => {}
        other => {
            return Err(CodecError::Malformed(format!(
                "payload entry carries {other:?}, expected Measurement"
            )))
        }
    }

    let metadata = Fields::new(pair.get(1)?, "payload metadata")?;
    let metadata = MessageMetadata {
        publisher_id: PublisherId::new(metadata.string(0)?),
        timestamp: metadata.u64(1)?,
        signature: metadata.string(2)?,
    };

    Ok(Arc::new(MeasurementRecord::new(
        measurement_fields(&message)?,
        metadata,
    )))
}
