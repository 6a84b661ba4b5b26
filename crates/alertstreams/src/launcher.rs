use crate::connector::Connector;
use crate::config::{AlertStreamsConfig, StreamDescriptor};
use crate::dispatch::{DispatchOptions, DispatchStats};
use crate::error::{ConfigurationError, Error};
use crate::handler::HandlerCatalog;
use crate::options::{load, StreamOptions};
use crate::registry::HandlerRegistry;
use crate::stream::{AlertStream, StreamState};

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// An alert stream with its connector type erased, so different variants can run side by side.
#[async_trait]
pub trait RunnableStream
where
    Self: Debug + Send + Sync + 'static,
{
    /// Instance name.
    fn stream_name(&self) -> &str;

    /// Current lifecycle state.
    fn current_state(&self) -> StreamState;

    /// Listens until `shutdown` is cancelled or the stream fails.
    async fn run(&self, shutdown: CancellationToken) -> Result<DispatchStats, Error>;
}

#[async_trait]
impl<S: AlertStream> RunnableStream for S {
    fn stream_name(&self) -> &str {
        self.name()
    }

    fn current_state(&self) -> StreamState {
        self.lifecycle().state()
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<DispatchStats, Error> {
        self.listen(shutdown).await
    }
}

/// Everything a variant constructor receives from a descriptor.
#[derive(Debug)]
pub struct StreamSetup<O> {
    /// Instance name.
    pub name: String,

    /// Validated typed options.
    pub options: O,

    /// Resolved handler registry.
    pub registry: HandlerRegistry,

    /// Dispatch loop settings from the descriptor.
    pub dispatch: DispatchOptions,
}

type StreamFactory = dyn Fn(&StreamDescriptor, &HandlerCatalog) -> Result<Box<dyn RunnableStream>, Error>
    + Send
    + Sync;

/// Stream variants available to configuration, keyed by descriptor `NAME`.
#[derive(Clone, Default)]
pub struct StreamKinds {
    kinds: BTreeMap<String, Arc<StreamFactory>>,
}

impl Debug for StreamKinds {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("StreamKinds")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StreamKinds {
    /// Creates an empty set of kinds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variant. Its options are validated and its handlers
    /// resolved before `build` runs.
    #[must_use]
    pub fn with<K, O, S, F>(mut self, kind: K, build: F) -> Self
    where
        K: Into<String>,
        O: StreamOptions,
        S: AlertStream,
        F: Fn(StreamSetup<O>) -> Result<S, Error> + Send + Sync + 'static,
    {
        let factory = move |descriptor: &StreamDescriptor,
                            catalog: &HandlerCatalog|
              -> Result<Box<dyn RunnableStream>, Error> {
            let (options, registry) = load::<O>(descriptor.options.clone(), catalog)?;

            let stream = build(StreamSetup {
                name: descriptor.instance_name().to_string(),
                options,
                registry,
                dispatch: descriptor.dispatch_options(),
            })?;

            let url = stream.endpoint().url;
            if !stream.connector().supports(&url) {
                return Err(ConfigurationError::InvalidValue {
                    key: "URL".to_string(),
                    reason: format!("`{url}` is not reachable with the selected connector"),
                }
                .into());
            }

            Ok(Box::new(stream))
        };

        self.kinds.insert(kind.into(), Arc::new(factory));
        self
    }

    /// Registered kind names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Builds the stream a descriptor describes.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown kind, invalid options or unresolved handlers.
    pub fn build(
        &self,
        descriptor: &StreamDescriptor,
        catalog: &HandlerCatalog,
    ) -> Result<Box<dyn RunnableStream>, Error> {
        let factory = self
            .kinds
            .get(&descriptor.name)
            .ok_or_else(|| ConfigurationError::UnknownStreamKind(descriptor.name.clone()))?;

        let stream = factory(descriptor, catalog)?;
        info!(kind = %descriptor.name, stream = %stream.stream_name(), "built alert stream");

        Ok(stream)
    }

    /// Builds every active stream, failing on the first descriptor that does not build.
    ///
    /// # Errors
    ///
    /// See [`StreamKinds::build`].
    pub fn build_active(
        &self,
        config: &AlertStreamsConfig,
        catalog: &HandlerCatalog,
    ) -> Result<Vec<Box<dyn RunnableStream>>, Error> {
        config
            .active()
            .map(|descriptor| self.build(descriptor, catalog))
            .collect()
    }
}

/// How one stream ended.
#[derive(Debug)]
pub struct StreamReport {
    /// Instance name.
    pub name: String,

    /// Dispatch counters, or what stopped the stream.
    pub result: Result<DispatchStats, Error>,
}

/// Runs each stream on its own task until `shutdown` is cancelled.
///
/// The first stream to end with an error stops the others, so the process
/// can exit and be restarted. Reports come back in input order.
pub async fn run_streams(
    streams: Vec<Box<dyn RunnableStream>>,
    shutdown: &CancellationToken,
) -> Vec<StreamReport> {
    let group = shutdown.child_token();
    let mut names = Vec::with_capacity(streams.len());
    let mut tasks = HashMap::with_capacity(streams.len());
    let mut set = JoinSet::new();

    for (index, stream) in streams.into_iter().enumerate() {
        names.push(stream.stream_name().to_string());
        let token = group.child_token();
        let handle = set.spawn(async move { stream.run(token).await });
        tasks.insert(handle.id(), index);
    }

    let mut results = names.iter().map(|_| None).collect::<Vec<_>>();
    while let Some(joined) = set.join_next_with_id().await {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => (e.id(), Err(Error::Join(e))),
        };
        let Some(&index) = tasks.get(&id) else {
            continue;
        };

        if let Err(e) = &result {
            error!(stream = %names[index], error = %e, "alert stream ended with error");
            if !group.is_cancelled() {
                warn!("stopping remaining alert streams");
                group.cancel();
            }
        }

        results[index] = Some(result);
    }

    names
        .into_iter()
        .zip(results)
        .filter_map(|(name, result)| result.map(|result| StreamReport { name, result }))
        .collect()
}
