//! In-memory (single process) broker and connector for tests and local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tom_alertstreams::alert::{Alert, Metadata};
use tom_alertstreams::connector::{
    BrokerEndpoint, Connection, Connector, StartPosition, SubscriptionRequest,
};
use tracing::debug;

#[derive(Debug, Default)]
struct TopicState {
    log: Vec<Alert>,
    subscribers: Vec<mpsc::UnboundedSender<Alert>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, TopicState>,
    requests: Vec<SubscriptionRequest>,
    closed: bool,
}

/// In-memory broker. Clones share the same topics.
///
/// Every published alert is retained, so subscriptions starting at
/// [`StartPosition::Earliest`] see the whole topic history.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates a new instance of `MemoryBroker`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a topic so it shows up in topic discovery before anything is published.
    pub async fn create_topic<K: Into<String>>(&self, topic: K) {
        self.state.lock().await.topics.entry(topic.into()).or_default();
    }

    /// Publishes an alert, creating the topic if needed.
    ///
    /// Returns the number of subscriptions the alert was delivered to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`MemoryBroker::shutdown`].
    pub async fn publish<K, P>(&self, topic: K, payload: P) -> Result<usize, Error>
    where
        K: Into<String>,
        P: Into<Bytes>,
    {
        self.publish_with_headers(topic, payload, Vec::new()).await
    }

    /// Publishes an alert carrying message headers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`MemoryBroker::shutdown`].
    pub async fn publish_with_headers<K, P>(
        &self,
        topic: K,
        payload: P,
        headers: Vec<(String, Bytes)>,
    ) -> Result<usize, Error>
    where
        K: Into<String>,
        P: Into<Bytes>,
    {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }

        let topic = topic.into();
        let entry = state.topics.entry(topic.clone()).or_default();

        let offset = i64::try_from(entry.log.len()).unwrap_or(i64::MAX);
        let alert = Alert::new(topic, payload).with_metadata(Metadata {
            partition: Some(0),
            offset: Some(offset),
            timestamp: Some(Utc::now()),
            key: None,
            headers,
        });

        entry
            .subscribers
            .retain(|subscriber| subscriber.send(alert.clone()).is_ok());
        entry.log.push(alert);

        Ok(entry.subscribers.len())
    }

    /// Subscription requests received so far, oldest first.
    pub async fn subscription_requests(&self) -> Vec<SubscriptionRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Topics known to the broker, sorted.
    pub async fn topics(&self) -> Vec<String> {
        self.state.lock().await.topics.keys().cloned().collect()
    }

    /// Refuses further work and ends every open subscription.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;

        state.closed = true;
        for topic in state.topics.values_mut() {
            topic.subscribers.clear();
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    type Error = Error;
    type Connection = MemoryConnection;

    async fn public_topics(&self, _endpoint: &BrokerEndpoint) -> Result<Vec<String>, Self::Error> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }

        Ok(state.topics.keys().cloned().collect())
    }

    async fn open(&self, request: SubscriptionRequest) -> Result<Self::Connection, Self::Error> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        for topic in &request.topics {
            let entry = state.topics.entry(topic.clone()).or_default();

            if request.start_at == StartPosition::Earliest {
                for alert in &entry.log {
                    // The receiver is still in scope, so sending cannot fail.
                    let _ = sender.send(alert.clone());
                }
            }

            entry.subscribers.push(sender.clone());
        }

        debug!(url = %request.target, topics = request.topics.len(), "memory subscription opened");
        state.requests.push(request);

        Ok(MemoryConnection { receiver })
    }
}

/// Open subscription on a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    receiver: mpsc::UnboundedReceiver<Alert>,
}

#[async_trait]
impl Connection for MemoryConnection {
    type Error = Error;

    async fn recv(&mut self) -> Result<Option<Alert>, Self::Error> {
        Ok(self.receiver.recv().await)
    }
}
