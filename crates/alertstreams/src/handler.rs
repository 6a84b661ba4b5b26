use crate::alert::Alert;
use crate::error::HandlerResolutionError;

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

/// Error type returned by handlers.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// A trait representing a side-effecting consumer of alerts on a topic.
///
/// Handlers are invoked one alert at a time, in delivery order. Returning an
/// error is the only way to signal failure; what happens next is decided by
/// the stream's [`FailurePolicy`](crate::dispatch::FailurePolicy).
#[async_trait]
pub trait AlertHandler
where
    Self: Debug + Send + Sync + 'static,
{
    /// Handles one alert.
    async fn handle(&self, alert: &Alert) -> Result<(), BoxError>;
}

/// A handler shared between the registry and the host that created it.
pub type SharedHandler = Arc<dyn AlertHandler>;

/// Handler backed by a synchronous closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> Debug for FnHandler<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FnHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> AlertHandler for FnHandler<F>
where
    F: Fn(&Alert) -> Result<(), BoxError> + Send + Sync + 'static,
{
    async fn handle(&self, alert: &Alert) -> Result<(), BoxError> {
        (self.f)(alert)
    }
}

/// Wraps a closure as a shared handler. The name only shows up in debug output.
pub fn handler_fn<K, F>(name: K, f: F) -> SharedHandler
where
    K: Into<String>,
    F: Fn(&Alert) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// Logs the topic and payload of every alert.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlertLogger;

#[async_trait]
impl AlertHandler for AlertLogger {
    async fn handle(&self, alert: &Alert) -> Result<(), BoxError> {
        info!(
            topic = %alert.topic(),
            offset = ?alert.offset(),
            payload = %alert.text(),
            "alert received"
        );

        Ok(())
    }
}

/// Handlers registered by the host under names that configuration can refer to.
///
/// `TOPIC_HANDLERS` entries in stream options are resolved against a catalog
/// when the stream is built, so an unknown name fails before any connection
/// is made.
#[derive(Clone, Debug, Default)]
pub struct HandlerCatalog {
    handlers: BTreeMap<String, SharedHandler>,
}

impl HandlerCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, replacing any previous handler with the same name.
    #[must_use]
    pub fn with<K: Into<String>>(mut self, name: K, handler: SharedHandler) -> Self {
        self.insert(name, handler);
        self
    }

    /// Adds a handler and returns the one it replaced, if any.
    pub fn insert<K: Into<String>>(&mut self, name: K, handler: SharedHandler) -> Option<SharedHandler> {
        self.handlers.insert(name.into(), handler)
    }

    /// Looks up a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedHandler> {
        self.handlers.get(name)
    }

    /// Registered handler names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Resolves the handler configured for `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if no handler is registered as `reference`.
    pub fn resolve(
        &self,
        topic: &str,
        reference: &str,
    ) -> Result<SharedHandler, HandlerResolutionError> {
        self.handlers
            .get(reference)
            .cloned()
            .ok_or_else(|| HandlerResolutionError {
                topic: topic.to_string(),
                reference: reference.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = handler_fn("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        handler.handle(&Alert::new("t", "a")).await.unwrap();
        handler.handle(&Alert::new("t", "b")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(format!("{handler:?}").contains("count"));
    }

    #[test]
    fn test_catalog_resolves_exact_handler() {
        let logger: SharedHandler = Arc::new(AlertLogger);
        let catalog = HandlerCatalog::new().with("alert_logger", Arc::clone(&logger));

        let resolved = catalog.resolve("hermes.test", "alert_logger").unwrap();

        assert!(Arc::ptr_eq(&resolved, &logger));
    }

    #[test]
    fn test_catalog_rejects_unknown_reference() {
        let catalog = HandlerCatalog::new().with("alert_logger", Arc::new(AlertLogger));

        let error = catalog.resolve("sys.heartbeat", "heartbeat").unwrap_err();

        assert_eq!(error.topic, "sys.heartbeat");
        assert_eq!(error.reference, "heartbeat");
    }

    #[test]
    fn test_insert_replaces() {
        let mut catalog = HandlerCatalog::new();

        assert!(catalog.insert("a", Arc::new(AlertLogger)).is_none());
        assert!(catalog.insert("a", Arc::new(AlertLogger)).is_some());
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["a"]);
    }
}
