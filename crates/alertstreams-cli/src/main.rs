//! CLI binary running the alert streams described in a configuration file.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tom_alertstreams::config::AlertStreamsConfig;
use tom_alertstreams::connector::Connector;
use tom_alertstreams::handler::{AlertLogger, HandlerCatalog};
use tom_alertstreams::launcher::{run_streams, RunnableStream, StreamKinds, StreamSetup};
use tom_alertstreams_gcn::{GcnClassicAlertStream, GcnClassicOptions};
use tom_alertstreams_hopskotch::{HeartbeatHandler, HopskotchAlertStream, HopskotchOptions};
use tom_alertstreams_memory::MemoryBroker;
use tom_alertstreams_nats::{NatsAlertStream, NatsConnector, NatsOptions};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "info";

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Building a stream failed
    #[error(transparent)]
    AlertStreams(#[from] tom_alertstreams::Error),

    /// The configuration file is unusable
    #[error(transparent)]
    Configuration(#[from] tom_alertstreams::ConfigurationError),

    /// The log level is not a valid filter
    #[error("invalid log level: {0}")]
    LogLevel(#[from] tracing_subscriber::filter::ParseError),

    /// Some streams ended with an error
    #[error("{0} alert stream(s) failed")]
    StreamsFailed(usize),

    /// `--stream` names no active stream
    #[error("no active alert stream named `{0}`")]
    UnknownStream(String),
}

/// Broker client used by every stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Broker {
    /// NATS servers, for `nats://` and `tls://` URLs.
    #[default]
    Nats,

    /// An in-process broker nobody else publishes to; useful to check a configuration end to end.
    Memory,
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file listing the alert streams
    #[arg(long, default_value = "alertstreams.toml", env = "ALERTSTREAMS_CONFIG")]
    config: PathBuf,

    /// Log level or filter directives, overriding the configuration file
    #[arg(long, env = "ALERTSTREAMS_LOG")]
    log_level: Option<String>,

    /// Only run the active stream with this instance name
    #[arg(long)]
    stream: Option<String>,

    /// Broker client to connect with
    #[arg(long, value_enum, default_value_t = Broker::Nats, env = "ALERTSTREAMS_BROKER")]
    broker: Broker,

    /// Validate the configuration and build the streams, then exit
    #[arg(long)]
    check: bool,
}

fn handler_catalog() -> HandlerCatalog {
    HandlerCatalog::new()
        .with("alert_logger", Arc::new(AlertLogger))
        .with("heartbeat", Arc::new(HeartbeatHandler::default()))
}

fn stream_kinds<C: Connector>(connector: &C) -> StreamKinds {
    let hopskotch = connector.clone();
    let gcn = connector.clone();
    let nats = connector.clone();

    StreamKinds::new()
        .with("hopskotch", move |setup: StreamSetup<HopskotchOptions>| {
            HopskotchAlertStream::from_setup(setup, hopskotch.clone())
        })
        .with("gcn_classic", move |setup: StreamSetup<GcnClassicOptions>| {
            GcnClassicAlertStream::from_setup(setup, gcn.clone())
        })
        .with("nats", move |setup: StreamSetup<NatsOptions>| {
            NatsAlertStream::from_setup(setup, nats.clone())
        })
}

fn build_streams(
    args: &Args,
    config: &AlertStreamsConfig,
    kinds: &StreamKinds,
) -> Result<Vec<Box<dyn RunnableStream>>, Error> {
    let catalog = handler_catalog();

    let Some(only) = &args.stream else {
        return Ok(kinds.build_active(config, &catalog)?);
    };

    let descriptor = config
        .active()
        .find(|descriptor| descriptor.instance_name() == only)
        .ok_or_else(|| Error::UnknownStream(only.clone()))?;

    Ok(vec![kinds.build(descriptor, &catalog)?])
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt signal");
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    // The log level may come from the file, so read it before logging starts.
    let config = AlertStreamsConfig::from_file(&args.config);
    let level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().and_then(|config| config.log_level.clone()))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level)?)
        .init();

    let config = config.inspect_err(|e| {
        error!(path = %args.config.display(), error = %e, "failed to load configuration");
    })?;

    let kinds = match args.broker {
        Broker::Nats => stream_kinds(&NatsConnector::new()),
        Broker::Memory => stream_kinds(&MemoryBroker::new()),
    };
    let streams = build_streams(&args, &config, &kinds)?;

    if args.check {
        info!(streams = streams.len(), "configuration is valid");
        return Ok(());
    }
    if streams.is_empty() {
        warn!("no active alert streams configured");
        return Ok(());
    }

    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;

        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    let reports = run_streams(streams, &shutdown_token).await;

    let mut failed = 0;
    for report in &reports {
        match &report.result {
            Ok(stats) => info!(
                stream = %report.name,
                received = stats.received,
                handled = stats.handled,
                unhandled = stats.unhandled,
                failed = stats.failed,
                "alert stream finished"
            ),
            Err(_) => failed += 1,
        }
    }

    if failed > 0 {
        return Err(Error::StreamsFailed(failed));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        LOG_LEVEL = "debug"

        [[ALERT_STREAMS]]
        NAME = "hopskotch"
        ID = "scimma"

        [ALERT_STREAMS.OPTIONS]
        URL = "kafka://kafka.scimma.org/"
        USERNAME = "tom"
        PASSWORD = "hunter2"

        [ALERT_STREAMS.OPTIONS.TOPIC_HANDLERS]
        "sys.heartbeat" = "heartbeat"
        "tomtoolkit.test" = "alert_logger"

        [[ALERT_STREAMS]]
        NAME = "gcn_classic"

        [ALERT_STREAMS.OPTIONS]
        GCN_CLASSIC_CLIENT_ID = "client"
        GCN_CLASSIC_CLIENT_SECRET = "shh"

        [ALERT_STREAMS.OPTIONS.TOPIC_HANDLERS]
        "gcn.classic.text.LVC_INITIAL" = "alert_logger"

        [[ALERT_STREAMS]]
        ACTIVE = false
        NAME = "nats"

        [ALERT_STREAMS.OPTIONS]
        URL = "nats://localhost:4222"
        TOPICS = ["alerts"]
    "#;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(["alertstreams"].iter().chain(extra))
    }

    #[test]
    fn test_builds_every_active_stream() {
        let config = AlertStreamsConfig::from_toml_str(CONFIG).unwrap();
        let kinds = stream_kinds(&MemoryBroker::new());

        let streams = build_streams(&args(&[]), &config, &kinds).unwrap();

        let names = streams.iter().map(|s| s.stream_name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["scimma", "gcn_classic"]);
    }

    #[test]
    fn test_stream_filter() {
        let config = AlertStreamsConfig::from_toml_str(CONFIG).unwrap();
        let kinds = stream_kinds(&MemoryBroker::new());

        let streams = build_streams(&args(&["--stream", "scimma"]), &config, &kinds).unwrap();
        assert_eq!(streams.len(), 1);

        let result = build_streams(&args(&["--stream", "nats"]), &config, &kinds);
        assert!(matches!(result, Err(Error::UnknownStream(name)) if name == "nats"));
    }

    #[test]
    fn test_sample_configuration_builds() {
        let config = AlertStreamsConfig::from_toml_str_with(
            include_str!("../../../alertstreams.toml"),
            |name| Some(format!("{}-value", name.to_lowercase())),
        )
        .unwrap();
        let kinds = stream_kinds(&MemoryBroker::new());

        let streams = build_streams(&args(&[]), &config, &kinds).unwrap();

        let names = streams.iter().map(|s| s.stream_name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["scimma", "gcn_classic"]);
        assert_eq!(
            config.alert_streams[0].options["USERNAME"],
            "scimma_auth_username-value"
        );
    }

    #[test]
    fn test_nats_broker_rejects_kafka_streams() {
        let config = AlertStreamsConfig::from_toml_str(CONFIG).unwrap();
        let kinds = stream_kinds(&NatsConnector::new());

        let result = build_streams(&args(&["--stream", "scimma"]), &config, &kinds);

        assert!(matches!(
            result,
            Err(Error::AlertStreams(tom_alertstreams::Error::Configuration(
                tom_alertstreams::ConfigurationError::InvalidValue { key, .. }
            ))) if key == "URL"
        ));
    }

    #[test]
    fn test_defaults() {
        let args = args(&["--check"]);

        assert_eq!(args.broker, Broker::Nats);
        assert!(args.check);
        assert!(args.stream.is_none());
    }
}
