//! NATS connector and a generic alert stream over NATS subjects.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connector;
mod error;
mod stream;

pub use connector::{
    server_address, NatsConnection, NatsConnector, DEFAULT_PORT, PASSWORD_SETTING, TOKEN_SETTING,
    USER_SETTING,
};
pub use error::Error;
pub use stream::{NatsAlertStream, NatsOptions};
