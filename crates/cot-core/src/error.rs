use thiserror::Error;

/// Errors produced by the relay and its collaborators.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("queue bind failed: {0}")]
    Bind(String),

    #[error("consumer registration failed: {0}")]
    Consume(String),

    #[error("payload decode failed: {0}")]
    Decode(String),

    #[error("broadcast error: {0}")]
    Broadcast(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Other(format!("json error: {e}"))
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
