use crate::error::{ConfigurationError, Error};
use crate::handler::HandlerCatalog;
use crate::registry::HandlerRegistry;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Option key carrying the serialized handler registry. Accepted by every variant.
pub const TOPIC_HANDLERS: &str = "TOPIC_HANDLERS";

/// Options exactly as the host supplied them.
pub type RawOptions = BTreeMap<String, Value>;

/// Required and allowed option keys of one stream variant.
///
/// Keys are compared case-insensitively. `TOPIC_HANDLERS` is always allowed.
#[derive(Clone, Copy, Debug)]
pub struct OptionsSchema {
    /// Keys that must be present with a non-null value.
    pub required: &'static [&'static str],

    /// Keys that may be present in addition to the required ones.
    pub allowed: &'static [&'static str],
}

impl OptionsSchema {
    /// Creates a schema.
    #[must_use]
    pub const fn new(required: &'static [&'static str], allowed: &'static [&'static str]) -> Self {
        Self { required, allowed }
    }

    fn accepts(&self, key: &str) -> bool {
        key.eq_ignore_ascii_case(TOPIC_HANDLERS)
            || self
                .required
                .iter()
                .chain(self.allowed)
                .any(|known| known.eq_ignore_ascii_case(key))
    }

    fn expected(&self) -> String {
        self.required
            .iter()
            .chain(self.allowed)
            .chain(std::iter::once(&TOPIC_HANDLERS))
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Checks raw options against the schema.
    ///
    /// Keys are lower-cased. Null values count as absent.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown or duplicated key, then on the first
    /// missing required key, then on a malformed `TOPIC_HANDLERS` value.
    pub fn validate(&self, raw: RawOptions) -> Result<ValidatedOptions, ConfigurationError> {
        let mut values = Map::new();
        let mut topic_handlers = None;
        let mut seen = BTreeSet::new();

        for (key, value) in raw {
            if !self.accepts(&key) {
                return Err(ConfigurationError::UnknownOption {
                    key,
                    expected: self.expected(),
                });
            }

            let lower = key.to_ascii_lowercase();
            if !seen.insert(lower.clone()) {
                return Err(ConfigurationError::DuplicateOption(key));
            }

            if value.is_null() {
                continue;
            }

            if lower.eq_ignore_ascii_case(TOPIC_HANDLERS) {
                topic_handlers = Some(parse_topic_handlers(&key, value)?);
            } else {
                values.insert(lower, value);
            }
        }

        for required in self.required {
            if !values.contains_key(&required.to_ascii_lowercase()) {
                return Err(ConfigurationError::MissingOption((*required).to_string()));
            }
        }

        Ok(ValidatedOptions {
            values,
            topic_handlers: topic_handlers.unwrap_or_default(),
        })
    }
}

fn parse_topic_handlers(
    key: &str,
    value: Value,
) -> Result<BTreeMap<String, String>, ConfigurationError> {
    let Value::Object(entries) = value else {
        return Err(ConfigurationError::InvalidValue {
            key: key.to_string(),
            reason: "expected a table of topic = handler name".to_string(),
        });
    };

    entries
        .into_iter()
        .map(|(topic, reference)| match reference {
            Value::String(reference) => Ok((topic, reference)),
            other => Err(ConfigurationError::InvalidValue {
                key: key.to_string(),
                reason: format!("handler for topic `{topic}` must be a name, got {other}"),
            }),
        })
        .collect()
}

/// Options that passed schema validation, keyed by lower-cased name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidatedOptions {
    values: Map<String, Value>,
    topic_handlers: BTreeMap<String, String>,
}

impl ValidatedOptions {
    /// Value of an option, looked up case-insensitively.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&key.to_ascii_lowercase())
    }

    /// Lower-cased keys of all present options, excluding `TOPIC_HANDLERS`.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// The serialized handler registry.
    #[must_use]
    pub const fn topic_handlers(&self) -> &BTreeMap<String, String> {
        &self.topic_handlers
    }

    /// Converts the options into a typed struct whose fields are the lower-cased keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has the wrong shape for its field.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ConfigurationError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(ConfigurationError::InvalidOptions)
    }
}

/// Typed options of one stream variant.
pub trait StreamOptions
where
    Self: Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    /// Keys the variant requires and accepts.
    const SCHEMA: OptionsSchema;

    /// Validates raw options against [`Self::SCHEMA`].
    ///
    /// # Errors
    ///
    /// See [`OptionsSchema::validate`].
    fn validate(raw: RawOptions) -> Result<ValidatedOptions, ConfigurationError> {
        Self::SCHEMA.validate(raw)
    }

    /// Builds the typed options from validated ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is unusable.
    fn from_validated(options: &ValidatedOptions) -> Result<Self, ConfigurationError> {
        options.deserialize()
    }
}

/// Validates raw options, resolves their `TOPIC_HANDLERS` and builds the typed options.
///
/// # Errors
///
/// Returns configuration errors and handler resolution errors; nothing is built
/// unless every step succeeds.
pub fn load<O: StreamOptions>(
    raw: RawOptions,
    catalog: &HandlerCatalog,
) -> Result<(O, HandlerRegistry), Error> {
    let validated = O::validate(raw)?;
    let registry = HandlerRegistry::resolve(validated.topic_handlers(), catalog)?;
    let options = O::from_validated(&validated)?;

    Ok((options, registry))
}
