use crate::connector::{BrokerEndpoint, Connector, StartPosition, SubscriptionRequest};
use crate::dispatch::{DispatchOptions, DispatchStats, Dispatcher};
use crate::error::{ConfigurationError, Error};
use crate::registry::HandlerRegistry;
use crate::topics::{subscription_url, TopicSet, WILDCARD_TOPIC};

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use url::Url;

/// Lifecycle states of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Built but not yet validated.
    Constructed,

    /// Options and handlers checked; ready to connect.
    Validated,

    /// Opening, or holding, a broker subscription.
    Connected,

    /// Running the dispatch loop.
    Listening,

    /// The dispatch loop ended. The stream may connect again.
    Stopped,
}

impl StreamState {
    /// Whether a stream in this state may move to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Constructed, Self::Validated)
                | (Self::Validated | Self::Stopped, Self::Connected)
                | (Self::Connected, Self::Listening)
                | (Self::Connected | Self::Listening, Self::Stopped)
        )
    }
}

/// Observable state of one stream.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<StreamState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A lifecycle in [`StreamState::Constructed`].
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(StreamState::Constructed);
        Self { state }
    }

    /// A lifecycle already in [`StreamState::Validated`], for constructors that validate eagerly.
    #[must_use]
    pub fn validated() -> Self {
        let lifecycle = Self::new();
        lifecycle.state.send_replace(StreamState::Validated);
        lifecycle
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Watches state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Moves to `next` if allowed.
    ///
    /// # Errors
    ///
    /// Returns the current state when the transition is not allowed.
    pub fn advance(&self, next: StreamState) -> Result<(), StreamState> {
        let mut result = Ok(());

        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                result = Err(*current);
                false
            }
        });

        result
    }

    fn set(&self, state: StreamState) {
        self.state.send_replace(state);
    }

    fn stop(&self) {
        self.set(StreamState::Stopped);
    }
}

/// Fails construction when a stream could never subscribe to anything.
///
/// # Errors
///
/// Returns [`ConfigurationError::NoTopics`] when there is no explicit topic
/// and no wildcard that topic discovery could expand.
pub fn ensure_has_topics(
    name: &str,
    registry: &HandlerRegistry,
    extra_topics: &[String],
    discovers_public_topics: bool,
) -> Result<(), ConfigurationError> {
    let explicit = registry.topics().next().is_some()
        || extra_topics.iter().any(|topic| topic != WILDCARD_TOPIC);
    let discoverable = discovers_public_topics && registry.has_wildcard();

    if explicit || discoverable {
        Ok(())
    } else {
        Err(ConfigurationError::NoTopics(name.to_string()))
    }
}

/// A trait representing a long-lived subscription that routes alerts to handlers by topic.
///
/// Variants supply their broker endpoint and options; subscription, dispatch
/// and lifecycle handling come from the provided methods.
#[async_trait]
pub trait AlertStream
where
    Self: Debug + Send + Sync + 'static,
{
    /// Broker client used to subscribe.
    type Connector: Connector;

    /// Instance name, used in logs.
    fn name(&self) -> &str;

    /// Topic to handler routing table.
    fn registry(&self) -> &Arc<HandlerRegistry>;

    /// The connector.
    fn connector(&self) -> &Self::Connector;

    /// The stream's lifecycle.
    fn lifecycle(&self) -> &Lifecycle;

    /// Broker address and client settings.
    fn endpoint(&self) -> BrokerEndpoint;

    /// Topics to subscribe to in addition to the registry's.
    fn extra_topics(&self) -> &[String] {
        &[]
    }

    /// Dispatch loop tuning.
    fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions::default()
    }

    /// Where new subscriptions start reading.
    fn start_position(&self) -> StartPosition {
        StartPosition::Latest
    }

    /// Whether a wildcard handler expands to the broker's public topics.
    fn discovers_public_topics(&self) -> bool {
        true
    }

    /// Renders the subscription target for `topics`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the result is not a valid URL.
    fn render_stream_url(&self, topics: &TopicSet) -> Result<Url, Error> {
        subscription_url(&self.endpoint().url, topics).map_err(|e| {
            ConfigurationError::InvalidValue {
                key: "URL".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Resolves the concrete topics to subscribe to.
    ///
    /// # Errors
    ///
    /// Fails if topic discovery fails or nothing is left to subscribe to.
    async fn topics(&self) -> Result<TopicSet, Error> {
        let public = if self.registry().has_wildcard() && self.discovers_public_topics() {
            let endpoint = self.endpoint();
            let public = self
                .connector()
                .public_topics(&endpoint)
                .await
                .map_err(|e| Error::TopicDiscovery(Box::new(e)))?;
            Some(public)
        } else {
            None
        };

        let registry = self.registry();
        let explicit = registry
            .topics()
            .map(str::to_string)
            .chain(registry.has_wildcard().then(|| WILDCARD_TOPIC.to_string()))
            .chain(self.extra_topics().iter().cloned());

        let topics = TopicSet::resolve(explicit, public);
        if topics.is_empty() {
            return Err(ConfigurationError::NoTopics(self.name().to_string()).into());
        }

        Ok(topics)
    }

    /// The subscription target for the current topics.
    ///
    /// # Errors
    ///
    /// See [`AlertStream::topics`] and [`AlertStream::render_stream_url`].
    async fn stream_url(&self) -> Result<Url, Error> {
        let topics = self.topics().await?;
        self.render_stream_url(&topics)
    }

    /// Opens a subscription to the current topics.
    ///
    /// # Errors
    ///
    /// Returns topic errors and [`Error::Connection`] if the connector fails.
    async fn connect(&self) -> Result<<Self::Connector as Connector>::Connection, Error> {
        let topics = self.topics().await?;
        let target = self.render_stream_url(&topics)?;

        info!(url = %target, topics = topics.len(), "opening subscription");

        let request = SubscriptionRequest {
            endpoint: self.endpoint(),
            target,
            topics,
            start_at: self.start_position(),
        };

        self.connector()
            .open(request)
            .await
            .map_err(|e| Error::Connection(Box::new(e)))
    }

    /// Connects and dispatches alerts until `shutdown` is cancelled or the connection fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the stream is validated or
    /// stopped, and otherwise whatever ended the dispatch loop.
    async fn listen(&self, shutdown: CancellationToken) -> Result<DispatchStats, Error> {
        let span = info_span!("alert_stream", stream = %self.name());

        async move {
            self.lifecycle()
                .advance(StreamState::Connected)
                .map_err(|state| Error::InvalidState {
                    stream: self.name().to_string(),
                    state,
                })?;

            let mut connection = match self.connect().await {
                Ok(connection) => connection,
                Err(e) => {
                    error!(error = %e, "failed to open subscription");
                    self.lifecycle().stop();
                    return Err(e);
                }
            };

            self.lifecycle().set(StreamState::Listening);
            info!("listening for alerts");

            let dispatcher = Dispatcher::new(Arc::clone(self.registry()), self.dispatch_options());
            let result = dispatcher.run(&mut connection, &shutdown).await;

            self.lifecycle().stop();
            match &result {
                Ok(stats) => info!(
                    received = stats.received,
                    handled = stats.handled,
                    unhandled = stats.unhandled,
                    failed = stats.failed,
                    "stream stopped"
                ),
                Err(e) => error!(error = %e, "stream stopped with error"),
            }

            result
        }
        .instrument(span)
        .await
    }
}
