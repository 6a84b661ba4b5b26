use crate::error::{ConfigurationError, HandlerResolutionError};
use crate::handler::{HandlerCatalog, SharedHandler};
use crate::topics::WILDCARD_TOPIC;

use std::collections::BTreeMap;

/// How a topic was matched to its handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// A handler registered for exactly this topic.
    Exact,

    /// The `*` fallback handler.
    Wildcard,
}

/// Immutable mapping from topic to handler, with an optional wildcard fallback.
#[derive(Clone, Debug, Default)]
pub struct HandlerRegistry {
    exact: BTreeMap<String, SharedHandler>,
    wildcard: Option<SharedHandler>,
}

impl HandlerRegistry {
    /// Starts building a registry in code.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Resolves a serialized `topic -> handler name` mapping against a catalog.
    ///
    /// # Errors
    ///
    /// Returns an error for the first topic whose handler name is not in the catalog.
    pub fn resolve(
        topic_handlers: &BTreeMap<String, String>,
        catalog: &HandlerCatalog,
    ) -> Result<Self, HandlerResolutionError> {
        let mut registry = Self::default();

        for (topic, reference) in topic_handlers {
            let handler = catalog.resolve(topic, reference)?;

            if topic == WILDCARD_TOPIC {
                registry.wildcard = Some(handler);
            } else {
                registry.exact.insert(topic.clone(), handler);
            }
        }

        Ok(registry)
    }

    /// Finds the handler for `topic`: the exact match first, then the wildcard.
    #[must_use]
    pub fn route(&self, topic: &str) -> Option<(&SharedHandler, Route)> {
        self.exact
            .get(topic)
            .map(|handler| (handler, Route::Exact))
            .or_else(|| self.wildcard.as_ref().map(|handler| (handler, Route::Wildcard)))
    }

    /// Topics with an explicit handler, excluding the wildcard.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.exact.keys().map(String::as_str)
    }

    /// Whether a `*` fallback handler is registered.
    #[must_use]
    pub const fn has_wildcard(&self) -> bool {
        self.wildcard.is_some()
    }

    /// Number of entries, counting the wildcard.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + usize::from(self.wildcard.is_some())
    }

    /// Whether no handler at all is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builder for [`HandlerRegistry`] used by hosts that register handlers in code.
#[derive(Debug, Default)]
pub struct HandlerRegistryBuilder {
    exact: BTreeMap<String, SharedHandler>,
    wildcard: Option<SharedHandler>,
    duplicate: Option<String>,
}

impl HandlerRegistryBuilder {
    /// Registers a handler for a topic. `*` registers the wildcard handler.
    #[must_use]
    pub fn topic<K: Into<String>>(mut self, topic: K, handler: SharedHandler) -> Self {
        let topic = topic.into();

        let replaced = if topic == WILDCARD_TOPIC {
            self.wildcard.replace(handler).is_some()
        } else {
            self.exact.insert(topic.clone(), handler).is_some()
        };

        if replaced && self.duplicate.is_none() {
            self.duplicate = Some(topic);
        }

        self
    }

    /// Registers the wildcard handler.
    #[must_use]
    pub fn wildcard(self, handler: SharedHandler) -> Self {
        self.topic(WILDCARD_TOPIC, handler)
    }

    /// Finishes the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a topic was registered more than once.
    pub fn build(self) -> Result<HandlerRegistry, ConfigurationError> {
        if let Some(topic) = self.duplicate {
            return Err(ConfigurationError::DuplicateTopic(topic));
        }

        Ok(HandlerRegistry {
            exact: self.exact,
            wildcard: self.wildcard,
        })
    }
}
