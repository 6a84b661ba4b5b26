use std::borrow::Cow;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

/// Delivery metadata a broker client attaches to a received alert.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Broker partition the alert was read from, if partitioned.
    pub partition: Option<i32>,

    /// Position of the alert within its partition or topic.
    pub offset: Option<i64>,

    /// Time the broker recorded for the alert.
    pub timestamp: Option<DateTime<Utc>>,

    /// Message key, if any.
    pub key: Option<Bytes>,

    /// Message headers in delivery order.
    pub headers: Vec<(String, Bytes)>,
}

/// A single message received on a topic.
///
/// Alerts are consumed exactly once by the dispatcher and dropped afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    topic: String,
    payload: Bytes,
    metadata: Option<Metadata>,
}

impl Alert {
    /// Creates an alert without metadata.
    #[must_use]
    pub fn new<K, P>(topic: K, payload: P) -> Self
    where
        K: Into<String>,
        P: Into<Bytes>,
    {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            metadata: None,
        }
    }

    /// Attaches delivery metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The topic the alert arrived on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The raw payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Delivery metadata, when the connector supplies it.
    #[must_use]
    pub const fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// The payload as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Decodes the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Value of the first header with the given name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Bytes> {
        self.metadata.as_ref().and_then(|metadata| {
            metadata
                .headers
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value)
        })
    }

    /// Broker offset, used to identify the alert in logs.
    #[must_use]
    pub fn offset(&self) -> Option<i64> {
        self.metadata.as_ref().and_then(|metadata| metadata.offset)
    }
}
