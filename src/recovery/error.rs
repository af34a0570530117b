use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Out of sequence reply from {publisher}: expected {expected}, got {actual}")]
    SequenceViolation {
        publisher: String,
        expected: u64,
        actual: u64,
    },

    #[error("Reply from {0} after it completed the round")]
    AfterComplete(String),

    #[error("Codec error: {0}")]
    CodecError(#[from] crate::protocol::CodecError),

    #[error("Transport error: {0}")]
    TransportError(#[from] crate::transport::TransportError),
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
