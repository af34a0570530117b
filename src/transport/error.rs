use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    #[error("Transport closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;
