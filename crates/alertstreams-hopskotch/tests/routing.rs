use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tom_alertstreams::Error;
use tom_alertstreams::connector::StartPosition;
use tom_alertstreams::dispatch::{DispatchOptions, DispatchStats, FailurePolicy};
use tom_alertstreams::handler::{handler_fn, SharedHandler};
use tom_alertstreams::registry::HandlerRegistry;
use tom_alertstreams::stream::{AlertStream, StreamState};
use tom_alertstreams_hopskotch::{HopskotchAlertStream, HopskotchOptions};
use tom_alertstreams_memory::MemoryBroker;
use url::Url;

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

fn options(topics: &[&str]) -> HopskotchOptions {
    HopskotchOptions {
        url: Url::parse("kafka://kafka.scimma.org/").unwrap(),
        username: "tom".to_string(),
        password: "hunter2".to_string(),
        topics: topics.iter().map(ToString::to_string).collect(),
        start_position: StartPosition::Latest,
    }
}

async fn start(
    stream: HopskotchAlertStream<MemoryBroker>,
) -> (
    Arc<HopskotchAlertStream<MemoryBroker>>,
    CancellationToken,
    JoinHandle<Result<DispatchStats, Error>>,
) {
    let stream = Arc::new(stream);
    let shutdown = CancellationToken::new();

    let listener = tokio::spawn({
        let stream = Arc::clone(&stream);
        let shutdown = shutdown.clone();
        async move { stream.listen(shutdown).await }
    });

    stream
        .lifecycle()
        .subscribe()
        .wait_for(|state| *state == StreamState::Listening)
        .await
        .unwrap();

    (stream, shutdown, listener)
}

async fn wait_for_calls(calls: &Calls, expected: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let seen = calls.lock().unwrap().len();
            if seen >= expected {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_exact_and_wildcard_routing_in_delivery_order() {
    let broker = MemoryBroker::new();
    for topic in ["A", "B", "C", "__consumer_offsets"] {
        broker.create_topic(topic).await;
    }

    let calls = Calls::default();
    let registry = HandlerRegistry::builder()
        .topic("A", recording("h1", &calls))
        .wildcard(recording("h2", &calls))
        .build()
        .unwrap();
    let stream = HopskotchAlertStream::new("scimma", options(&[]), registry, broker.clone()).unwrap();

    let (stream, shutdown, listener) = start(stream).await;

    broker.publish("A", "a").await.unwrap();
    broker.publish("B", "b").await.unwrap();
    broker.publish("C", "c").await.unwrap();
    wait_for_calls(&calls, 3).await;
    shutdown.cancel();

    let stats = listener.await.unwrap().unwrap();
    assert_eq!(*calls.lock().unwrap(), vec!["h1(A)", "h2(B)", "h2(C)"]);
    assert_eq!(stats.handled, 3);

    let requests = broker.subscription_requests().await;
    assert_eq!(requests[0].target.as_str(), "kafka://kafka.scimma.org/A,B,C");
    assert_eq!(
        stream.stream_url().await.unwrap().as_str(),
        "kafka://kafka.scimma.org/A,B,C"
    );
}

#[tokio::test]
async fn test_unhandled_topic_is_dropped_and_the_loop_continues() {
    let broker = MemoryBroker::new();

    let calls = Calls::default();
    let registry = HandlerRegistry::builder()
        .topic("A", recording("h1", &calls))
        .build()
        .unwrap();
    let stream = HopskotchAlertStream::new("scimma", options(&["Z"]), registry, broker.clone()).unwrap();

    let (_stream, shutdown, listener) = start(stream).await;

    broker.publish("Z", "z").await.unwrap();
    broker.publish("A", "a").await.unwrap();
    wait_for_calls(&calls, 1).await;
    shutdown.cancel();

    let stats = listener.await.unwrap().unwrap();
    assert_eq!(*calls.lock().unwrap(), vec!["h1(A)"]);
    assert_eq!(stats.received, 2);
    assert_eq!(stats.unhandled, 1);
    assert_eq!(stats.handled, 1);
}

#[tokio::test]
async fn test_handler_failure_does_not_block_the_next_alert() {
    let broker = MemoryBroker::new();

    let calls = Calls::default();
    let registry = HandlerRegistry::builder()
        .topic("A", handler_fn("flaky", |alert| {
            if alert.text() == "bad" {
                Err("malformed alert".into())
            } else {
                Ok(())
            }
        }))
        .topic("B", recording("h2", &calls))
        .build()
        .unwrap();
    let stream = HopskotchAlertStream::new("scimma", options(&[]), registry, broker.clone())
        .unwrap()
        .with_dispatch_options(DispatchOptions {
            failure_policy: FailurePolicy::Continue,
            idle_timeout: None,
        });

    let (_stream, shutdown, listener) = start(stream).await;

    broker.publish("A", "bad").await.unwrap();
    broker.publish("B", "next").await.unwrap();
    wait_for_calls(&calls, 1).await;
    shutdown.cancel();

    let stats = listener.await.unwrap().unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.handled, 1);
}

#[tokio::test]
async fn test_broker_shutdown_ends_the_stream() {
    let broker = MemoryBroker::new();

    let calls = Calls::default();
    let registry = HandlerRegistry::builder()
        .topic("A", recording("h1", &calls))
        .build()
        .unwrap();
    let stream = HopskotchAlertStream::new("scimma", options(&[]), registry, broker.clone()).unwrap();

    let (stream, _shutdown, listener) = start(stream).await;
    broker.shutdown().await;

    let result = listener.await.unwrap();
    assert!(matches!(result, Err(Error::ConnectionClosed)));
    assert_eq!(stream.lifecycle().state(), StreamState::Stopped);
}
