use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tom_alertstreams::Error;
use tom_alertstreams::connector::{BrokerEndpoint, Connector, StartPosition};
use tom_alertstreams::dispatch::DispatchOptions;
use tom_alertstreams::launcher::StreamSetup;
use tom_alertstreams::options::{OptionsSchema, StreamOptions};
use tom_alertstreams::registry::HandlerRegistry;
use tom_alertstreams::stream::{ensure_has_topics, AlertStream, Lifecycle};
use url::Url;

/// Security protocol of Hopskotch connections.
pub const SECURITY_PROTOCOL: &str = "SASL_SSL";

/// SASL mechanism of Hopskotch credentials.
pub const SASL_MECHANISM: &str = "SCRAM-SHA-512";

/// Options of a [`HopskotchAlertStream`].
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HopskotchOptions {
    /// Broker URL, e.g. `kafka://kafka.scimma.org/`.
    pub url: Url,

    /// SCiMMA Auth username.
    pub username: String,

    /// SCiMMA Auth password.
    pub password: String,

    /// Topics to subscribe to in addition to those with a handler.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Where to start reading.
    #[serde(default)]
    pub start_position: StartPosition,
}

impl Debug for HopskotchOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HopskotchOptions")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("topics", &self.topics)
            .field("start_position", &self.start_position)
            .finish()
    }
}

impl StreamOptions for HopskotchOptions {
    const SCHEMA: OptionsSchema =
        OptionsSchema::new(&["URL", "USERNAME", "PASSWORD"], &["TOPICS", "START_POSITION"]);
}

/// Alert stream reading from Hopskotch, where the topics are part of the stream URL.
#[derive(Debug)]
pub struct HopskotchAlertStream<C: Connector> {
    name: String,
    options: HopskotchOptions,
    registry: Arc<HandlerRegistry>,
    connector: C,
    lifecycle: Lifecycle,
    dispatch: DispatchOptions,
}

impl<C: Connector> HopskotchAlertStream<C> {
    /// Creates a validated stream.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to subscribe to.
    pub fn new(
        name: impl Into<String>,
        options: HopskotchOptions,
        registry: HandlerRegistry,
        connector: C,
    ) -> Result<Self, Error> {
        let name = name.into();
        ensure_has_topics(&name, &registry, &options.topics, true)?;

        Ok(Self {
            name,
            options,
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
    /// See [`HopskotchAlertStream::new`].
    pub fn from_setup(setup: StreamSetup<HopskotchOptions>, connector: C) -> Result<Self, Error> {
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
    pub const fn options(&self) -> &HopskotchOptions {
        &self.options
    }
}

#[async_trait]
impl<C: Connector> AlertStream for HopskotchAlertStream<C> {
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
        BrokerEndpoint::new(self.options.url.clone())
            .with_setting("security.protocol", SECURITY_PROTOCOL)
            .with_setting("sasl.mechanism", SASL_MECHANISM)
            .with_setting("sasl.username", &self.options.username)
            .with_setting("sasl.password", &self.options.password)
    }

    fn extra_topics(&self) -> &[String] {
        &self.options.topics
    }

    fn dispatch_options(&self) -> DispatchOptions {
        self.dispatch
    }

    fn start_position(&self) -> StartPosition {
        self.options.start_position
    }
}
