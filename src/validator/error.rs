use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Transport error: {0}")]
    TransportError(#[from] crate::transport::TransportError),

    #[error("Recovery error: {0}")]
    RecoveryError(#[from] crate::recovery::RecoveryError),
}

pub type ValidatorResult<T> = Result<T, ValidatorError>;
