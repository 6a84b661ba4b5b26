//! Alert stream reading GCN Classic notices from the GCN Kafka broker.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod stream;

pub use stream::{
    lvc_registry, GcnClassicAlertStream, GcnClassicOptions, DEFAULT_DOMAIN, GROUP_ID_SETTING,
    LVC_TOPICS,
};
