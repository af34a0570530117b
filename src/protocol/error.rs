use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u64),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;
