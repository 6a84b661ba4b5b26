use crate::handler::BoxError;
use crate::stream::StreamState;

use thiserror::Error;

/// Errors raised while validating stream configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The same option was supplied twice (option keys are case-insensitive).
    #[error("option `{0}` was given more than once")]
    DuplicateOption(String),

    /// The same topic was registered twice.
    #[error("topic `{0}` has more than one handler")]
    DuplicateTopic(String),

    /// Options could not be converted into the variant's typed options.
    #[error("invalid options: {0}")]
    InvalidOptions(#[source] serde_json::Error),

    /// A single option has an unusable value.
    #[error("invalid value for option `{key}`: {reason}")]
    InvalidValue {
        /// The option key as written in configuration.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A `${VAR}` reference named an unset environment variable.
    #[error("environment variable `{0}` is not set")]
    MissingEnvVar(String),

    /// A required option is absent.
    #[error("missing required option `{0}`")]
    MissingOption(String),

    /// The stream would subscribe to nothing.
    #[error("stream `{0}` has no topics to subscribe to")]
    NoTopics(String),

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Read(#[from] std::io::Error),

    /// An option outside the variant's required and allowed keys.
    #[error("unrecognized option `{key}` (expected one of: {expected})")]
    UnknownOption {
        /// The offending key as written in configuration.
        key: String,
        /// Comma-separated list of accepted keys.
        expected: String,
    },

    /// No stream variant is registered under this name.
    #[error("unknown stream kind `{0}`")]
    UnknownStreamKind(String),
}

/// A configured handler reference does not name a registered handler.
#[derive(Debug, Error)]
#[error("handler `{reference}` for topic `{topic}` is not registered")]
pub struct HandlerResolutionError {
    /// Topic the handler was configured for.
    pub topic: String,

    /// The unresolved handler name.
    pub reference: String,
}

/// A handler panicked while processing an alert.
#[derive(Debug, Error)]
#[error("handler panicked: {0}")]
pub struct HandlerPanic(pub String);

/// Errors that can occur while building or running an alert stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected at construction time.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The connector could not open or keep the subscription.
    #[error("connection error: {0}")]
    Connection(#[source] BoxError),

    /// The broker ended the subscription.
    #[error("connection closed by broker")]
    ConnectionClosed,

    /// A handler failed while the stream runs with the abort policy.
    #[error("handler for topic `{topic}` failed: {source}")]
    HandlerExecution {
        /// Topic of the alert being handled.
        topic: String,

        /// The handler's error.
        #[source]
        source: BoxError,
    },

    /// The task running a stream panicked or was aborted.
    #[error("stream task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A handler reference could not be resolved.
    #[error(transparent)]
    HandlerResolution(#[from] HandlerResolutionError),

    /// `listen` was called on a stream that is not ready to connect.
    #[error("stream `{stream}` cannot start listening while {state:?}")]
    InvalidState {
        /// Name of the stream.
        stream: String,

        /// State the stream was in.
        state: StreamState,
    },

    /// The broker's topic list could not be fetched for wildcard expansion.
    #[error("topic discovery failed: {0}")]
    TopicDiscovery(#[source] BoxError),
}

impl Error {
    /// Whether the error happened before the stream could start listening.
    #[must_use]
    pub const fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::HandlerResolution(_) | Self::InvalidState { .. }
        )
    }
}
