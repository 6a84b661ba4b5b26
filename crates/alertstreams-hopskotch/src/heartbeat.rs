use crate::error::Error;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tom_alertstreams::alert::Alert;
use tom_alertstreams::handler::{AlertHandler, BoxError};
use tracing::{debug, info, warn};

/// Topic the broker publishes its heartbeat on.
pub const HEARTBEAT_TOPIC: &str = "sys.heartbeat";

/// Log one heartbeat in this many.
pub const DEFAULT_SAMPLE_INTERVAL: u64 = 300;

/// A broker heartbeat.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,

    /// Sequence number of the beat.
    pub count: u64,

    /// Free-form beat marker.
    #[serde(default)]
    pub beat: Option<String>,
}

impl Heartbeat {
    /// Decodes a heartbeat payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a heartbeat document.
    pub fn from_alert(alert: &Alert) -> Result<Self, Error> {
        Ok(alert.json()?)
    }

    /// The beat time in UTC.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamp is out of range.
    pub fn time(&self) -> Result<DateTime<Utc>, Error> {
        DateTime::from_timestamp_micros(self.timestamp).ok_or(Error::Timestamp(self.timestamp))
    }
}

/// Handler that decodes heartbeats and logs a sample of them.
///
/// Counts are tracked per topic, so one handler can serve several heartbeat topics.
#[derive(Debug)]
pub struct HeartbeatHandler {
    sample_interval: u64,
    received: AtomicU64,
    sampled: AtomicU64,
    last_counts: DashMap<String, u64>,
}

impl Default for HeartbeatHandler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }
}

impl HeartbeatHandler {
    /// Logs every heartbeat whose count is a multiple of `sample_interval`. Zero is treated as one.
    #[must_use]
    pub fn new(sample_interval: u64) -> Self {
        Self {
            sample_interval: if sample_interval == 0 { 1 } else { sample_interval },
            received: AtomicU64::new(0),
            sampled: AtomicU64::new(0),
            last_counts: DashMap::new(),
        }
    }

    /// Heartbeats decoded so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    /// Heartbeats logged so far.
    pub fn sampled(&self) -> u64 {
        self.sampled.load(Ordering::SeqCst)
    }

    /// Count of the latest heartbeat on `topic`.
    pub fn last_count(&self, topic: &str) -> Option<u64> {
        self.last_counts.get(topic).map(|count| *count)
    }
}

#[async_trait]
impl AlertHandler for HeartbeatHandler {
    async fn handle(&self, alert: &Alert) -> Result<(), BoxError> {
        let heartbeat = Heartbeat::from_alert(alert)?;
        let time = heartbeat.time()?;

        self.received.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .last_counts
            .insert(alert.topic().to_string(), heartbeat.count);
        if let Some(previous) = previous.filter(|previous| heartbeat.count < *previous) {
            warn!(
                topic = %alert.topic(),
                previous,
                count = heartbeat.count,
                "heartbeat count went backwards"
            );
        }

        if heartbeat.count % self.sample_interval == 0 {
            self.sampled.fetch_add(1, Ordering::SeqCst);
            info!(
                topic = %alert.topic(),
                timestamp = %time.to_rfc3339(),
                count = heartbeat.count,
                beat = ?heartbeat.beat,
                "heartbeat"
            );
        } else {
            debug!(count = heartbeat.count, "heartbeat");
        }

        Ok(())
    }
}
