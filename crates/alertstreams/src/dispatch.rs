use crate::alert::Alert;
use crate::connector::Connection;
use crate::error::{Error, HandlerPanic};
use crate::handler::BoxError;
use crate::registry::{HandlerRegistry, Route};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What the dispatch loop does when a handler returns an error.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure with its topic and error, then move on to the next alert.
    #[default]
    Continue,

    /// Stop the stream with [`Error::HandlerExecution`].
    Abort,
}

/// Tuning for the dispatch loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Handler failure policy.
    pub failure_policy: FailurePolicy,

    /// Log inactivity after this long without an alert. Pulls are never abandoned.
    pub idle_timeout: Option<Duration>,
}

/// Result of dispatching a single alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A handler processed the alert.
    Handled(Route),

    /// No handler matched; the alert was dropped.
    Unhandled,

    /// The handler failed and the policy let the loop continue.
    Failed,
}

/// Counters kept by one run of the dispatch loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Alerts pulled from the connection.
    pub received: u64,

    /// Alerts a handler processed successfully.
    pub handled: u64,

    /// Alerts dropped because no handler matched.
    pub unhandled: u64,

    /// Alerts whose handler failed.
    pub failed: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Handled(_) => self.handled += 1,
            Outcome::Unhandled => self.unhandled += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// Routes alerts from a connection to the handlers of a registry, one at a time.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    options: DispatchOptions,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<HandlerRegistry>, options: DispatchOptions) -> Self {
        Self { registry, options }
    }

    /// Routes one alert to its handler and waits for the handler to finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerExecution`] only under [`FailurePolicy::Abort`].
    /// A panicking handler counts as a failed one.
    pub async fn dispatch(&self, alert: &Alert) -> Result<Outcome, Error> {
        let Some((handler, route)) = self.registry.route(alert.topic()) else {
            error!(
                topic = %alert.topic(),
                offset = ?alert.offset(),
                "alert received but no handler defined"
            );
            return Ok(Outcome::Unhandled);
        };

        let result = AssertUnwindSafe(handler.handle(alert))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())));

        match result {
            Ok(()) => Ok(Outcome::Handled(route)),
            Err(e) => match self.options.failure_policy {
                FailurePolicy::Continue => {
                    error!(
                        topic = %alert.topic(),
                        offset = ?alert.offset(),
                        error = %e,
                        "handler failed"
                    );
                    Ok(Outcome::Failed)
                }
                FailurePolicy::Abort => Err(Error::HandlerExecution {
                    topic: alert.topic().to_string(),
                    source: e,
                }),
            },
        }
    }

    /// Pulls alerts until `shutdown` is cancelled or the connection fails.
    ///
    /// Cancellation is checked between pulls. An alert already pulled is
    /// handled to completion before the loop looks at the token again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if a pull fails, [`Error::ConnectionClosed`]
    /// if the broker ends the subscription, and handler errors under
    /// [`FailurePolicy::Abort`].
    pub async fn run<C: Connection>(
        &self,
        connection: &mut C,
        shutdown: &CancellationToken,
    ) -> Result<DispatchStats, Error> {
        let mut stats = DispatchStats::default();

        loop {
            let pulled = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!(received = stats.received, "shutdown requested");
                    return Ok(stats);
                }
                pulled = self.pull(connection) => pulled,
            };

            let alert = match pulled {
                Pull::Idle => continue,
                Pull::Alert(Ok(Some(alert))) => alert,
                Pull::Alert(Ok(None)) => return Err(Error::ConnectionClosed),
                Pull::Alert(Err(e)) => return Err(Error::Connection(Box::new(e))),
            };

            stats.received += 1;
            let outcome = self.dispatch(&alert).await?;
            stats.record(outcome);
        }
    }

    async fn pull<C: Connection>(&self, connection: &mut C) -> Pull<C::Error> {
        let Some(idle_timeout) = self.options.idle_timeout else {
            return Pull::Alert(connection.recv().await);
        };

        match tokio::time::timeout(idle_timeout, connection.recv()).await {
            Ok(result) => Pull::Alert(result),
            Err(_) => {
                debug!(?idle_timeout, "no alert received within idle timeout");
                Pull::Idle
            }
        }
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> BoxError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    Box::new(HandlerPanic(message))
}

enum Pull<E> {
    Alert(Result<Option<Alert>, E>),
    Idle,
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::connector::ConnectorError;
    use crate::handler::{handler_fn, SharedHandler};

    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    #[derive(Debug, thiserror::Error)]
    #[error("pull failed")]
    struct PullError;

    impl ConnectorError for PullError {}

    struct ChannelConnection(mpsc::UnboundedReceiver<Result<Alert, PullError>>);

    #[async_trait]
    impl Connection for ChannelConnection {
        type Error = PullError;

        async fn recv(&mut self) -> Result<Option<Alert>, Self::Error> {
            self.0.recv().await.transpose()
        }
    }

    fn connection(
        alerts: &[&'static str],
    ) -> (mpsc::UnboundedSender<Result<Alert, PullError>>, ChannelConnection) {
        let (sender, receiver) = mpsc::unbounded_channel();
        for topic in alerts {
            sender.send(Ok(Alert::new(*topic, *topic))).unwrap();
        }
        (sender, ChannelConnection(receiver))
    }

    type Calls = Arc<Mutex<Vec<String>>>;

    fn recording(name: &'static str, calls: &Calls) -> SharedHandler {
        let calls = Arc::clone(calls);
        handler_fn(name, move |alert| {
            calls
                .lock()
                .unwrap()
                .push(format!("{name}({})", alert.topic()));
            Ok(())
        })
    }

    fn dispatcher(registry: HandlerRegistry, failure_policy: FailurePolicy) -> Dispatcher {
        Dispatcher::new(
            Arc::new(registry),
            DispatchOptions {
                failure_policy,
                idle_timeout: None,
            },
        )
    }

    #[tokio::test]
    async fn test_exact_then_wildcard_in_order() {
        let calls = Calls::default();
        let registry = HandlerRegistry::builder()
            .topic("A", recording("h1", &calls))
            .wildcard(recording("h2", &calls))
            .build()
            .unwrap();
        let dispatcher = dispatcher(registry, FailurePolicy::Continue);
        let (_sender, mut connection) = connection(&["A", "B", "C"]);
        let shutdown = CancellationToken::new();

        let watcher = shutdown.clone();
        let observed = Arc::clone(&calls);
        tokio::spawn(async move {
            loop {
                let seen = observed.lock().unwrap().len();
                if seen >= 3 {
                    break;
                }
                tokio::task::yield_now().await;
            }
            watcher.cancel();
        });

        let stats = dispatcher.run(&mut connection, &shutdown).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["h1(A)", "h2(B)", "h2(C)"]);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.handled, 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unhandled_topic_is_logged_and_dropped() {
        let calls = Calls::default();
        let registry = HandlerRegistry::builder()
            .topic("A", recording("h1", &calls))
            .build()
            .unwrap();
        let dispatcher = dispatcher(registry, FailurePolicy::Continue);

        let outcome = dispatcher.dispatch(&Alert::new("Z", "z")).await.unwrap();
        assert_eq!(outcome, Outcome::Unhandled);
        assert!(calls.lock().unwrap().is_empty());
        assert!(logs_contain("alert received but no handler defined"));

        let outcome = dispatcher.dispatch(&Alert::new("A", "a")).await.unwrap();
        assert_eq!(outcome, Outcome::Handled(Route::Exact));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_handler_does_not_stop_the_loop() {
        let calls = Calls::default();
        let registry = HandlerRegistry::builder()
            .topic(
                "bad",
                handler_fn("bad", |_| Err("cannot parse alert".into())),
            )
            .topic("good", recording("good", &calls))
            .build()
            .unwrap();
        let dispatcher = dispatcher(registry, FailurePolicy::Continue);
        let (sender, mut connection) = connection(&["bad", "good"]);
        drop(sender);

        let result = dispatcher.run(&mut connection, &CancellationToken::new()).await;

        assert_matches!(result, Err(Error::ConnectionClosed));
        assert_eq!(*calls.lock().unwrap(), vec!["good(good)"]);
        assert!(logs_contain("handler failed"));
        assert!(logs_contain("cannot parse alert"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panicking_handler_does_not_stop_the_loop() {
        let calls = Calls::default();
        let registry = HandlerRegistry::builder()
            .topic("A", handler_fn("panics", |_| panic!("bad alert")))
            .topic("B", recording("good", &calls))
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), DispatchOptions::default());
        let (sender, mut connection) = connection(&["A", "B"]);
        drop(sender);

        let outcome = dispatcher.dispatch(&Alert::new("A", "a")).await.unwrap();
        assert_eq!(outcome, Outcome::Failed);

        let run = tokio::spawn(async move {
            dispatcher.run(&mut connection, &CancellationToken::new()).await
        });
        let result = run.await.unwrap();

        assert_matches!(result, Err(Error::ConnectionClosed));
        assert_eq!(*calls.lock().unwrap(), vec!["good(B)"]);
        assert!(logs_contain("handler panicked: bad alert"));
    }

    #[tokio::test]
    async fn test_panicking_handler_under_abort_is_a_handler_error() {
        let registry = HandlerRegistry::builder()
            .topic("A", handler_fn("panics", |_| panic!("bad alert")))
            .build()
            .unwrap();
        let dispatcher = dispatcher(registry, FailurePolicy::Abort);

        let result = dispatcher.dispatch(&Alert::new("A", "a")).await;

        assert_matches!(
            result,
            Err(Error::HandlerExecution { topic, source })
                if topic == "A" && source.to_string() == "handler panicked: bad alert"
        );
    }

    #[tokio::test]
    async fn test_abort_policy_stops_on_failure() {
        let calls = Calls::default();
        let registry = HandlerRegistry::builder()
            .topic("bad", handler_fn("bad", |_| Err("boom".into())))
            .topic("good", recording("good", &calls))
            .build()
            .unwrap();
        let dispatcher = dispatcher(registry, FailurePolicy::Abort);
        let (_sender, mut connection) = connection(&["bad", "good"]);

        let result = dispatcher.run(&mut connection, &CancellationToken::new()).await;

        assert_matches!(result, Err(Error::HandlerExecution { topic, .. }) if topic == "bad");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_error_is_fatal() {
        let registry = HandlerRegistry::default();
        let dispatcher = dispatcher(registry, FailurePolicy::Continue);
        let (sender, mut connection) = connection(&[]);
        sender.send(Err(PullError)).unwrap();

        let result = dispatcher.run(&mut connection, &CancellationToken::new()).await;

        assert_matches!(result, Err(Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_pull_returns_empty_stats() {
        let dispatcher = dispatcher(HandlerRegistry::default(), FailurePolicy::Continue);
        let (_sender, mut connection) = connection(&["A"]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = dispatcher.run(&mut connection, &shutdown).await.unwrap();

        assert_eq!(stats, DispatchStats::default());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_idle_timeout_keeps_waiting() {
        let calls = Calls::default();
        let registry = HandlerRegistry::builder()
            .topic("late", recording("h", &calls))
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            DispatchOptions {
                failure_policy: FailurePolicy::Continue,
                idle_timeout: Some(Duration::from_secs(1)),
            },
        );
        let (sender, mut connection) = connection(&[]);
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let observed = Arc::clone(&calls);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            sender.send(Ok(Alert::new("late", "x"))).unwrap();
            loop {
                let seen = observed.lock().unwrap().len();
                if seen > 0 {
                    break;
                }
                tokio::task::yield_now().await;
            }
            token.cancel();
        });

        let stats = dispatcher.run(&mut connection, &shutdown).await.unwrap();

        assert_eq!(stats.handled, 1);
        assert!(logs_contain("no alert received within idle timeout"));
    }
}
