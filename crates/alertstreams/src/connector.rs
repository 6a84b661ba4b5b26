use crate::alert::Alert;
use crate::topics::TopicSet;

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

/// Marker trait for connector errors.
pub trait ConnectorError: Error + Send + Sync + 'static {}

/// Where a new subscription starts reading.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// Only alerts published after the subscription opens.
    #[default]
    Latest,

    /// Every alert the broker still retains.
    Earliest,
}

/// Broker address plus client settings, e.g. SASL credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Base URL of the broker.
    pub url: Url,

    /// Client library settings, keyed the way broker clients name them.
    pub client_config: BTreeMap<String, String>,
}

impl BrokerEndpoint {
    /// Creates an endpoint without client settings.
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            client_config: BTreeMap::new(),
        }
    }

    /// Adds a client setting.
    #[must_use]
    pub fn with_setting<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.client_config.insert(key.into(), value.into());
        self
    }

    /// Value of a client setting.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.client_config.get(key).map(String::as_str)
    }
}

/// Everything a connector needs to open a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Broker to connect to.
    pub endpoint: BrokerEndpoint,

    /// Rendered stream URL naming the topics, for client libraries that take one.
    pub target: Url,

    /// Concrete topics to subscribe to. Never contains the wildcard.
    pub topics: TopicSet,

    /// Where to start reading.
    pub start_at: StartPosition,
}

/// An open subscription yielding alerts in delivery order.
#[async_trait]
pub trait Connection
where
    Self: Send + 'static,
{
    /// The error type for the connection.
    type Error: ConnectorError;

    /// Waits for the next alert. `Ok(None)` means the broker closed the subscription.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no alert.
    async fn recv(&mut self) -> Result<Option<Alert>, Self::Error>;
}

/// A trait representing a broker client able to open subscriptions.
#[async_trait]
pub trait Connector
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the connector.
    type Error: ConnectorError;

    /// The subscription type the connector opens.
    type Connection: Connection;

    /// Lists the topics the broker currently exposes to this client.
    async fn public_topics(&self, endpoint: &BrokerEndpoint) -> Result<Vec<String>, Self::Error>;

    /// Opens a subscription.
    async fn open(&self, request: SubscriptionRequest) -> Result<Self::Connection, Self::Error>;

    /// Whether the connector can reach a broker at `url`. Checked when a stream is built.
    fn supports(&self, _url: &Url) -> bool {
        true
    }
}
