use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(String),

    #[error("Codec error: {0}")]
    CodecError(#[from] crate::protocol::CodecError),

    #[error("Transport error: {0}")]
    TransportError(#[from] crate::transport::TransportError),
}

pub type BrokerResult<T> = Result<T, BrokerError>;
