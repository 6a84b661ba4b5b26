use crate::error::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};

use async_nats::{Client, ConnectOptions, Message, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::SelectAll;
use tom_alertstreams::alert::{Alert, Metadata};
use tom_alertstreams::connector::{
    BrokerEndpoint, Connection, Connector, StartPosition, SubscriptionRequest,
};
use tracing::{debug, info, warn};
use url::Url;

/// Default NATS client port.
pub const DEFAULT_PORT: u16 = 4222;

/// Client setting holding the NATS user.
pub const USER_SETTING: &str = "nats.user";

/// Client setting holding the NATS password.
pub const PASSWORD_SETTING: &str = "nats.password";

/// Client setting holding a NATS auth token.
pub const TOKEN_SETTING: &str = "nats.token";

const SASL_USERNAME_SETTING: &str = "sasl.username";
const SASL_PASSWORD_SETTING: &str = "sasl.password";

/// Connector that subscribes to NATS subjects, one subject per topic.
#[derive(Clone, Debug, Default)]
pub struct NatsConnector {
    client_name: Option<String>,
}

impl NatsConnector {
    /// Creates a new instance of `NatsConnector`.
    #[must_use]
    pub const fn new() -> Self {
        Self { client_name: None }
    }

    /// Sets the client name reported to the server.
    #[must_use]
    pub fn with_client_name<K: Into<String>>(mut self, name: K) -> Self {
        self.client_name = Some(name.into());
        self
    }

    fn connect_options(&self, endpoint: &BrokerEndpoint) -> ConnectOptions {
        let mut options = ConnectOptions::new();

        if let Some(name) = &self.client_name {
            options = options.name(name);
        }

        match Credentials::from_endpoint(endpoint) {
            Credentials::Token(token) => options.token(token),
            Credentials::UserAndPassword(user, password) => options.user_and_password(user, password),
            Credentials::None => options,
        }
    }

    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Client, Error> {
        let address = server_address(&endpoint.url)?;
        debug!(%address, "connecting to NATS");

        let client = self.connect_options(endpoint).connect(address.as_str()).await?;

        Ok(client)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Credentials {
    Token(String),
    UserAndPassword(String, String),
    None,
}

impl Credentials {
    fn from_endpoint(endpoint: &BrokerEndpoint) -> Self {
        if let Some(token) = endpoint.setting(TOKEN_SETTING) {
            return Self::Token(token.to_string());
        }

        let user = endpoint
            .setting(USER_SETTING)
            .or_else(|| endpoint.setting(SASL_USERNAME_SETTING));
        let password = endpoint
            .setting(PASSWORD_SETTING)
            .or_else(|| endpoint.setting(SASL_PASSWORD_SETTING));

        match (user, password) {
            (Some(user), Some(password)) => Self::UserAndPassword(user.to_string(), password.to_string()),
            _ => Self::None,
        }
    }
}

/// The `scheme://host:port` address of a NATS broker URL.
///
/// # Errors
///
/// Returns an error for schemes other than `nats` and `tls`, or a URL without a host.
pub fn server_address(url: &Url) -> Result<String, Error> {
    let scheme = url.scheme();
    if scheme != "nats" && scheme != "tls" {
        return Err(Error::UnsupportedScheme(scheme.to_string()));
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::MissingHost(url.to_string()))?;
    let port = url.port().unwrap_or(DEFAULT_PORT);

    Ok(format!("{scheme}://{host}:{port}"))
}

#[async_trait]
impl Connector for NatsConnector {
    type Error = Error;
    type Connection = NatsConnection;

    async fn public_topics(&self, endpoint: &BrokerEndpoint) -> Result<Vec<String>, Self::Error> {
        warn!(url = %endpoint.url, "NATS has no topic listing; wildcard handlers only see explicit topics");

        Ok(Vec::new())
    }

    async fn open(&self, request: SubscriptionRequest) -> Result<Self::Connection, Self::Error> {
        if request.start_at == StartPosition::Earliest {
            warn!("core NATS subscriptions cannot replay history; starting at latest");
        }

        let client = self.connect(&request.endpoint).await?;

        let mut subscribers = SelectAll::new();
        for topic in &request.topics {
            subscribers.push(client.subscribe(topic.clone()).await?);
        }

        info!(topics = %request.topics, "subscribed to NATS subjects");

        Ok(NatsConnection {
            _client: client,
            subscribers,
        })
    }

    fn supports(&self, url: &Url) -> bool {
        server_address(url).is_ok()
    }
}

/// Open NATS subscriptions, merged into one alert stream.
pub struct NatsConnection {
    _client: Client,
    subscribers: SelectAll<Subscriber>,
}

impl Debug for NatsConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsConnection")
            .field("subscriptions", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for NatsConnection {
    type Error = Error;

    async fn recv(&mut self) -> Result<Option<Alert>, Self::Error> {
        Ok(self.subscribers.next().await.map(message_to_alert))
    }
}

fn message_to_alert(message: Message) -> Alert {
    let headers = message
        .headers
        .as_ref()
        .map(|headers| {
            headers
                .iter()
                .flat_map(|(name, values)| {
                    values
                        .iter()
                        .map(move |value| (name.to_string(), Bytes::from(value.to_string())))
                })
                .collect()
        })
        .unwrap_or_default();

    Alert::new(message.subject.to_string(), message.payload).with_metadata(Metadata {
        headers,
        ..Metadata::default()
    })
}
