pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode, encode, PROTOCOL_VERSION};
pub use error::{CodecError, CodecResult};
pub use types::{
    Confirmation, Measurement, MeasurementRecord, MessageMetadata, MessageType, PublisherId,
    RecoveryComplete, RecoveryRequest, RecoveryResponse, SystemMessage,
};
