//! Abstract interface for alert streams: long-lived subscriptions to
//! publish/subscribe brokers that route every received alert to a handler
//! chosen by topic.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Alerts and their delivery metadata.
pub mod alert;

/// Hosting configuration file with stream descriptors.
pub mod config;

/// Connectors open broker subscriptions on behalf of a stream.
pub mod connector;

/// The receive-and-route loop shared by every stream variant.
pub mod dispatch;

mod error;

/// Handlers process alerts for a topic.
pub mod handler;

/// Builds and runs a set of configured streams.
pub mod launcher;

/// Validation of per-variant stream options.
pub mod options;

/// Topic to handler routing table.
pub mod registry;

/// The alert stream contract and its lifecycle.
pub mod stream;

/// Topic sets and subscription target construction.
pub mod topics;

pub use error::{ConfigurationError, Error, HandlerPanic, HandlerResolutionError};
