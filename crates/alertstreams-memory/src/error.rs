use thiserror::Error;
use tom_alertstreams::connector::ConnectorError;

/// Errors that can occur when using the in-memory broker.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The broker was shut down.
    #[error("memory broker is shut down")]
    Closed,
}

impl ConnectorError for Error {}
