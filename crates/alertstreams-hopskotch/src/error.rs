use thiserror::Error;

/// Errors raised by the heartbeat handler.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload is not a heartbeat document.
    #[error("invalid heartbeat payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The timestamp does not fit a UTC date.
    #[error("heartbeat timestamp {0} is out of range")]
    Timestamp(i64),
}
