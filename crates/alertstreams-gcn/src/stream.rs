use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tom_alertstreams::connector::{BrokerEndpoint, Connector};
use tom_alertstreams::dispatch::DispatchOptions;
use tom_alertstreams::handler::SharedHandler;
use tom_alertstreams::launcher::StreamSetup;
use tom_alertstreams::options::{OptionsSchema, StreamOptions, ValidatedOptions};
use tom_alertstreams::registry::HandlerRegistry;
use tom_alertstreams::stream::{ensure_has_topics, AlertStream, Lifecycle};
use tom_alertstreams::{ConfigurationError, Error};
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Domain of the production GCN deployment.
pub const DEFAULT_DOMAIN: &str = "gcn.nasa.gov";

/// Client setting naming the consumer group.
pub const GROUP_ID_SETTING: &str = "group.id";

/// GCN Classic topics carrying LIGO/Virgo/KAGRA notices.
pub const LVC_TOPICS: [&str; 3] = [
    "gcn.classic.text.LVC_INITIAL",
    "gcn.classic.text.LVC_PRELIMINARY",
    "gcn.classic.text.LVC_RETRACTION",
];

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

/// Options of a [`GcnClassicAlertStream`].
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcnClassicOptions {
    /// OIDC client id from gcn.nasa.gov.
    pub gcn_classic_client_id: String,

    /// OIDC client secret from gcn.nasa.gov.
    pub gcn_classic_client_secret: String,

    /// GCN deployment, e.g. `test.gcn.nasa.gov`.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Topics to subscribe to in addition to those with a handler.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Client settings overriding the derived ones.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

impl Debug for GcnClassicOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GcnClassicOptions")
            .field("gcn_classic_client_id", &self.gcn_classic_client_id)
            .field("gcn_classic_client_secret", &"<redacted>")
            .field("domain", &self.domain)
            .field("topics", &self.topics)
            .field("config", &self.config.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StreamOptions for GcnClassicOptions {
    const SCHEMA: OptionsSchema = OptionsSchema::new(
        &["GCN_CLASSIC_CLIENT_ID", "GCN_CLASSIC_CLIENT_SECRET"],
        &["TOPICS", "DOMAIN", "CONFIG"],
    );

    fn from_validated(options: &ValidatedOptions) -> Result<Self, ConfigurationError> {
        let options: Self = options.deserialize()?;

        for (key, value) in &options.config {
            setting_value(key, value)?;
        }

        Ok(options)
    }
}

fn setting_value(key: &str, value: &Value) -> Result<String, ConfigurationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ConfigurationError::InvalidValue {
            key: format!("CONFIG.{key}"),
            reason: "expected a string, number or boolean".to_string(),
        }),
    }
}

impl GcnClassicOptions {
    /// Client settings for the GCN Kafka broker.
    ///
    /// Derived settings use OIDC client credentials against the domain's
    /// token endpoint. Entries from `config` replace derived ones. A random
    /// `group.id` is generated when none is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if a `config` value is not a scalar.
    pub fn client_config(&self) -> Result<BTreeMap<String, String>, ConfigurationError> {
        let domain = &self.domain;
        let mut settings: BTreeMap<String, String> = [
            ("bootstrap.servers", format!("kafka.{domain}")),
            ("security.protocol", "sasl_ssl".to_string()),
            ("sasl.mechanisms", "OAUTHBEARER".to_string()),
            ("sasl.oauthbearer.method", "oidc".to_string()),
            ("sasl.oauthbearer.client.id", self.gcn_classic_client_id.clone()),
            ("sasl.oauthbearer.client.secret", self.gcn_classic_client_secret.clone()),
            (
                "sasl.oauthbearer.token.endpoint.url",
                format!("https://auth.{domain}/oauth2/token"),
            ),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        for (key, value) in &self.config {
            settings.insert(key.clone(), setting_value(key, value)?);
        }

        if !settings.contains_key(GROUP_ID_SETTING) {
            let group = Uuid::new_v4().to_string();
            debug!(group = %group, "generated consumer group");
            settings.insert(GROUP_ID_SETTING.to_string(), group);
        }

        Ok(settings)
    }

    /// Broker address for the configured domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain does not form a valid host.
    pub fn broker_url(&self) -> Result<Url, ConfigurationError> {
        Url::parse(&format!("kafka://kafka.{}/", self.domain)).map_err(|e| {
            ConfigurationError::InvalidValue {
                key: "DOMAIN".to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Routes every LVC notice topic to `handler`.
///
/// # Errors
///
/// Never fails for distinct topics; the builder's error is passed through.
pub fn lvc_registry(handler: &SharedHandler) -> Result<HandlerRegistry, Error> {
    let registry = LVC_TOPICS
        .iter()
        .fold(HandlerRegistry::builder(), |builder, topic| {
            builder.topic(*topic, Arc::clone(handler))
        })
        .build()?;

    Ok(registry)
}

/// Alert stream reading GCN Classic notices.
///
/// The broker is not asked for its topic list, so a wildcard handler only
/// covers `TOPICS` and topics without their own handler.
#[derive(Debug)]
pub struct GcnClassicAlertStream<C: Connector> {
    name: String,
    options: GcnClassicOptions,
    url: Url,
    client_config: BTreeMap<String, String>,
    registry: Arc<HandlerRegistry>,
    connector: C,
    lifecycle: Lifecycle,
    dispatch: DispatchOptions,
}

impl<C: Connector> GcnClassicAlertStream<C> {
    /// Creates a validated stream. The client settings are fixed here, so the
    /// consumer group stays the same across reconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to subscribe to or the domain or
    /// client settings are unusable.
    pub fn new(
        name: impl Into<String>,
        options: GcnClassicOptions,
        registry: HandlerRegistry,
        connector: C,
    ) -> Result<Self, Error> {
        let name = name.into();
        ensure_has_topics(&name, &registry, &options.topics, false)?;

        let url = options.broker_url()?;
        let client_config = options.client_config()?;

        Ok(Self {
            name,
            options,
            url,
            client_config,
            registry: Arc::new(registry),
            connector,
            lifecycle: Lifecycle::validated(),
            dispatch: DispatchOptions::default(),
        })
    }

    /// Builds the stream from a launcher setup.
    ///
    /// # Errors
    ///
    /// See [`GcnClassicAlertStream::new`].
    pub fn from_setup(setup: StreamSetup<GcnClassicOptions>, connector: C) -> Result<Self, Error> {
        let dispatch = setup.dispatch;
        let stream = Self::new(setup.name, setup.options, setup.registry, connector)?;

        Ok(stream.with_dispatch_options(dispatch))
    }

    /// Replaces the dispatch loop settings.
    #[must_use]
    pub const fn with_dispatch_options(mut self, dispatch: DispatchOptions) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// The stream's options.
    #[must_use]
    pub const fn options(&self) -> &GcnClassicOptions {
        &self.options
    }

    /// Client settings handed to the connector.
    #[must_use]
    pub const fn client_config(&self) -> &BTreeMap<String, String> {
        &self.client_config
    }
}

#[async_trait]
impl<C: Connector> AlertStream for GcnClassicAlertStream<C> {
    type Connector = C;

    fn name(&self) -> &str {
        &self.name
    }

    fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    fn connector(&self) -> &C {
        &self.connector
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn endpoint(&self) -> BrokerEndpoint {
        self.client_config
            .iter()
            .fold(BrokerEndpoint::new(self.url.clone()), |endpoint, (key, value)| {
                endpoint.with_setting(key, value)
            })
    }

    fn extra_topics(&self) -> &[String] {
        &self.options.topics
    }

    fn dispatch_options(&self) -> DispatchOptions {
        self.dispatch
    }

    fn discovers_public_topics(&self) -> bool {
        false
    }
}
