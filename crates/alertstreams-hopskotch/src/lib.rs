//! Alert stream for the SCiMMA Hopskotch brokers.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod heartbeat;
mod stream;

pub use error::Error;
pub use heartbeat::{Heartbeat, HeartbeatHandler, DEFAULT_SAMPLE_INTERVAL, HEARTBEAT_TOPIC};
pub use stream::{HopskotchAlertStream, HopskotchOptions, SASL_MECHANISM, SECURITY_PROTOCOL};
