use crate::connector::{NatsConnector, PASSWORD_SETTING, TOKEN_SETTING, USER_SETTING};

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tom_alertstreams::Error;
use tom_alertstreams::connector::{BrokerEndpoint, Connector};
use tom_alertstreams::dispatch::DispatchOptions;
use tom_alertstreams::launcher::StreamSetup;
use tom_alertstreams::options::{OptionsSchema, StreamOptions};
use tom_alertstreams::registry::HandlerRegistry;
use tom_alertstreams::stream::{ensure_has_topics, AlertStream, Lifecycle};
use tom_alertstreams::topics::TopicSet;
use url::Url;

/// Options of a [`NatsAlertStream`].
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NatsOptions {
    /// Server URL, e.g. `nats://localhost:4222`.
    pub url: Url,

    /// User for user/password authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for user/password authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Token authentication. Takes precedence over user/password.
    #[serde(default)]
    pub token: Option<String>,

    /// Subjects to subscribe to in addition to those with a handler.
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Debug for NatsOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsOptions")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("topics", &self.topics)
            .finish()
    }
}

impl StreamOptions for NatsOptions {
    const SCHEMA: OptionsSchema =
        OptionsSchema::new(&["URL"], &["USERNAME", "PASSWORD", "TOKEN", "TOPICS"]);
}

/// Alert stream over core NATS subjects.
///
/// NATS cannot list subjects, so a wildcard handler only covers topics named
/// in `TOPICS` and subjects nobody else handles.
#[derive(Debug)]
pub struct NatsAlertStream<C: Connector = NatsConnector> {
    name: String,
    options: NatsOptions,
    registry: Arc<HandlerRegistry>,
    connector: C,
    lifecycle: Lifecycle,
    dispatch: DispatchOptions,
}

impl<C: Connector> NatsAlertStream<C> {
    /// Creates a validated stream.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to subscribe to.
    pub fn new(
        name: impl Into<String>,
        options: NatsOptions,
        registry: HandlerRegistry,
        connector: C,
    ) -> Result<Self, Error> {
        let name = name.into();
        ensure_has_topics(&name, &registry, &options.topics, false)?;

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
    /// See [`NatsAlertStream::new`].
    pub fn from_setup(setup: StreamSetup<NatsOptions>, connector: C) -> Result<Self, Error> {
        let dispatch = setup.dispatch;
        Ok(Self::new(setup.name, setup.options, setup.registry, connector)?.with_dispatch_options(dispatch))
    }

    /// Replaces the dispatch loop settings.
    #[must_use]
    pub const fn with_dispatch_options(mut self, dispatch: DispatchOptions) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// The stream's options.
    #[must_use]
    pub const fn options(&self) -> &NatsOptions {
        &self.options
    }
}

#[async_trait]
impl<C: Connector> AlertStream for NatsAlertStream<C> {
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
        let mut endpoint = BrokerEndpoint::new(self.options.url.clone());

        if let Some(username) = &self.options.username {
            endpoint = endpoint.with_setting(USER_SETTING, username);
        }
        if let Some(password) = &self.options.password {
            endpoint = endpoint.with_setting(PASSWORD_SETTING, password);
        }
        if let Some(token) = &self.options.token {
            endpoint = endpoint.with_setting(TOKEN_SETTING, token);
        }

        endpoint
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

    fn render_stream_url(&self, _topics: &TopicSet) -> Result<Url, Error> {
        Ok(self.options.url.clone())
    }
}
