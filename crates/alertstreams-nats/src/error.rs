use thiserror::Error;
use tom_alertstreams::connector::ConnectorError;

/// Errors that can occur when using the NATS connector.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not connect to the NATS server.
    #[error("failed to connect to NATS: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// The broker URL has no host.
    #[error("broker URL `{0}` has no host")]
    MissingHost(String),

    /// Could not subscribe to a subject.
    #[error("failed to subscribe to NATS subject: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// The broker URL does not use a NATS scheme.
    #[error("unsupported scheme `{0}` (expected nats or tls)")]
    UnsupportedScheme(String),
}

impl ConnectorError for Error {}
