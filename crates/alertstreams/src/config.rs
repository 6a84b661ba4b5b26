use crate::dispatch::{DispatchOptions, FailurePolicy};
use crate::error::ConfigurationError;
use crate::options::RawOptions;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

const fn default_active() -> bool {
    true
}

/// One configured alert stream.
///
/// Keys are accepted in upper or lower case, e.g. `ACTIVE` or `active`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StreamDescriptor {
    /// Inactive descriptors are parsed but never built.
    #[serde(default = "default_active", alias = "ACTIVE")]
    pub active: bool,

    /// Stream kind, e.g. `hopskotch` or `gcn_classic`.
    #[serde(alias = "NAME")]
    pub name: String,

    /// Instance name. Defaults to the kind.
    #[serde(default, alias = "ID")]
    pub id: Option<String>,

    /// Handler failure policy for this stream.
    #[serde(default, alias = "FAILURE_POLICY")]
    pub failure_policy: FailurePolicy,

    /// Seconds without an alert after which inactivity is logged.
    #[serde(default, alias = "IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Variant options, including `TOPIC_HANDLERS`.
    #[serde(default, alias = "OPTIONS")]
    pub options: RawOptions,
}

impl StreamDescriptor {
    /// Name the built stream runs under.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Dispatch loop settings for this stream.
    #[must_use]
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            failure_policy: self.failure_policy,
            idle_timeout: self.idle_timeout.map(Duration::from_secs),
        }
    }
}

/// Hosting configuration: the process log level and the configured streams.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AlertStreamsConfig {
    /// Process-wide log filter, e.g. `info` or `tom_alertstreams=debug`.
    #[serde(default, alias = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Stream descriptors in file order.
    #[serde(default, alias = "ALERT_STREAMS")]
    pub alert_streams: Vec<StreamDescriptor>,
}

impl AlertStreamsConfig {
    /// Parses TOML, expanding `${VAR}` option values from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a referenced variable is unset.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigurationError> {
        Self::from_toml_str_with(input, |name| std::env::var(name).ok())
    }

    /// Parses TOML, expanding `${VAR}` option values through `lookup`.
    ///
    /// Only option values that consist of a single reference are expanded.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or `lookup` has no value for a reference.
    pub fn from_toml_str_with<F>(input: &str, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Self = toml::from_str(input)?;

        for descriptor in &mut config.alert_streams {
            if descriptor.idle_timeout == Some(0) {
                return Err(ConfigurationError::InvalidValue {
                    key: "IDLE_TIMEOUT".to_string(),
                    reason: format!(
                        "stream `{}` needs a timeout of at least one second",
                        descriptor.instance_name()
                    ),
                });
            }

            for value in descriptor.options.values_mut() {
                expand(value, &lookup)?;
            }
        }

        Ok(config)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// Descriptors marked active.
    pub fn active(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.alert_streams.iter().filter(|descriptor| descriptor.active)
    }
}

fn expand<F>(value: &mut Value, lookup: &F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => {
            if let Some(name) = text.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                *text = lookup(name).ok_or_else(|| ConfigurationError::MissingEnvVar(name.to_string()))?;
            }
        }
        Value::Array(items) => {
            for item in items {
                expand(item, lookup)?;
            }
        }
        Value::Object(entries) => {
            for item in entries.values_mut() {
                expand(item, lookup)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use serde_json::json;

    const CONFIG: &str = r#"
        LOG_LEVEL = "debug"

        [[ALERT_STREAMS]]
        ACTIVE = true
        NAME = "hopskotch"
        ID = "scimma"
        FAILURE_POLICY = "abort"
        IDLE_TIMEOUT = 30

        [ALERT_STREAMS.OPTIONS]
        URL = "kafka://kafka.scimma.org/"
        USERNAME = "${SCIMMA_AUTH_USERNAME}"
        PASSWORD = "${SCIMMA_AUTH_PASSWORD}"
        TOPICS = ["tomtoolkit.test"]

        [ALERT_STREAMS.OPTIONS.TOPIC_HANDLERS]
        "sys.heartbeat" = "heartbeat"

        [[ALERT_STREAMS]]
        active = false
        name = "gcn_classic"

        [ALERT_STREAMS.options]
        GCN_CLASSIC_CLIENT_ID = "id"
    "#;

    fn env(name: &str) -> Option<String> {
        match name {
            "SCIMMA_AUTH_USERNAME" => Some("tom".to_string()),
            "SCIMMA_AUTH_PASSWORD" => Some("hunter2".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_descriptors() {
        let config = AlertStreamsConfig::from_toml_str_with(CONFIG, env).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.alert_streams.len(), 2);

        let scimma = &config.alert_streams[0];
        assert_eq!(scimma.instance_name(), "scimma");
        assert_eq!(scimma.options["USERNAME"], json!("tom"));
        assert_eq!(scimma.options["PASSWORD"], json!("hunter2"));
        assert_eq!(
            scimma.options["TOPIC_HANDLERS"],
            json!({ "sys.heartbeat": "heartbeat" })
        );
        assert_eq!(
            scimma.dispatch_options(),
            DispatchOptions {
                failure_policy: FailurePolicy::Abort,
                idle_timeout: Some(Duration::from_secs(30)),
            }
        );

        let gcn = &config.alert_streams[1];
        assert_eq!(gcn.instance_name(), "gcn_classic");
        assert_eq!(gcn.dispatch_options(), DispatchOptions::default());
    }

    #[test]
    fn test_active_filter() {
        let config = AlertStreamsConfig::from_toml_str_with(CONFIG, env).unwrap();

        let active = config.active().map(StreamDescriptor::instance_name).collect::<Vec<_>>();

        assert_eq!(active, vec!["scimma"]);
    }

    #[test]
    fn test_missing_environment_variable() {
        let result = AlertStreamsConfig::from_toml_str_with(CONFIG, |_| None);

        assert_matches!(result, Err(ConfigurationError::MissingEnvVar(name)) if name == "SCIMMA_AUTH_PASSWORD");
    }

    #[test]
    fn test_zero_idle_timeout_is_rejected() {
        let input = r#"
            [[alert_streams]]
            name = "nats"
            idle_timeout = 0
        "#;

        let result = AlertStreamsConfig::from_toml_str_with(input, |_| None);

        assert_matches!(
            result,
            Err(ConfigurationError::InvalidValue { key, .. }) if key == "IDLE_TIMEOUT"
        );
    }

    #[test]
    fn test_partial_references_are_left_alone() {
        let input = r#"
            [[alert_streams]]
            name = "nats"

            [alert_streams.options]
            URL = "nats://${HOST}:4222"
        "#;

        let config = AlertStreamsConfig::from_toml_str_with(input, |_| None).unwrap();

        assert_eq!(
            config.alert_streams[0].options["URL"],
            json!("nats://${HOST}:4222")
        );
    }

    #[test]
    fn test_nested_values_expand() {
        let input = r#"
            [[alert_streams]]
            name = "gcn_classic"

            [alert_streams.options.CONFIG]
            "group.id" = "${GROUP}"
        "#;

        let config =
            AlertStreamsConfig::from_toml_str_with(input, |_| Some("tom-group".to_string())).unwrap();

        assert_eq!(
            config.alert_streams[0].options["CONFIG"],
            json!({ "group.id": "tom-group" })
        );
        assert!(config.alert_streams[0].active);
    }

    #[test]
    fn test_unknown_descriptor_key() {
        let input = r#"
            [[alert_streams]]
            name = "hopskotch"
            enabled = true
        "#;

        assert_matches!(
            AlertStreamsConfig::from_toml_str_with(input, |_| None),
            Err(ConfigurationError::Parse(_))
        );
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            AlertStreamsConfig::from_file("/nonexistent/alertstreams.toml"),
            Err(ConfigurationError::Read(_))
        );
    }
}
