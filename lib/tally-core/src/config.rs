//! Reporter configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tally_common::{
    deser::{EmptyStringAsNone, PermissiveBool},
    time::{duration_from_secs, positive_duration_from_secs, MAX_CONFIGURED_DURATION},
};
use tally_config::GenericConfiguration;
use tally_error::GenericError;

use crate::{
    buffer::OverflowPolicy,
    error::ReporterError,
    matcher::MatchRule,
    retry::RetryConfiguration,
    sample::MetricCategory,
};

/// How batches are handed to the sink.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One batch in flight at a time, in sequence order. A batch is sent only after the previous one succeeded or was
    /// dropped.
    #[default]
    Ordered,

    /// Up to `max_in_flight` batches in flight concurrently. Batches may arrive out of order.
    Pipelined,
}

const fn default_batch_size() -> usize {
    50
}

const fn default_batch_delay_secs() -> f64 {
    1.0
}

const fn default_buffer_capacity() -> usize {
    10_000
}

const fn default_max_in_flight() -> usize {
    4
}

const fn default_shutdown_timeout_secs() -> f64 {
    5.0
}

/// Reporter configuration.
///
/// Every field has a default. The configuration is checked once, by [`validate`][Self::validate], when a reporter
/// starts, and is immutable afterwards.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ReporterConfiguration {
    /// Whether the reporter is enabled.
    ///
    /// A disabled reporter accepts and discards every sample.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub enabled: bool,

    /// Number of buffered samples that triggers an immediate flush, and the largest batch sent.
    ///
    /// Defaults to 50.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time between flushes while samples are buffered, in seconds.
    ///
    /// Defaults to 1 second.
    #[serde(default = "default_batch_delay_secs")]
    pub batch_delay_secs: f64,

    /// Hard cap on buffered samples.
    ///
    /// Defaults to 10,000.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// What happens to samples appended to a full buffer.
    ///
    /// Defaults to dropping the newest sample.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Categories whose samples are discarded at ingest.
    #[serde(default)]
    pub disabled_metrics_categories: Vec<MetricCategory>,

    /// Prepended to the name of every sample.
    #[serde(default)]
    pub prefix: String,

    /// Name of the registry the reporter attaches to.
    ///
    /// Reporters with the same registry name receive the same samples. Defaults to the shared default registry.
    #[serde_as(as = "EmptyStringAsNone")]
    #[serde(default)]
    pub registry_name: Option<String>,

    /// Label match rules, in evaluation order.
    #[serde(default)]
    pub label_matches: Vec<MatchRule>,

    /// Labels removed from every sample.
    #[serde(default)]
    pub excluded_labels: Vec<String>,

    /// Whether a label with in-scope match rules must match one of them for the sample to be kept.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub strict_label_matching: bool,

    /// How batches are handed to the sink.
    ///
    /// Defaults to ordered delivery.
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Maximum number of concurrent sends with pipelined delivery.
    ///
    /// Defaults to 4.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Upper bound on how long stopping the reporter may take, in seconds.
    ///
    /// Defaults to 5 seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: f64,

    /// Retry behavior for failed transmissions.
    #[serde(default)]
    pub retry: RetryConfiguration,
}

impl Default for ReporterConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: default_batch_size(),
            batch_delay_secs: default_batch_delay_secs(),
            buffer_capacity: default_buffer_capacity(),
            overflow_policy: OverflowPolicy::default(),
            disabled_metrics_categories: Vec::new(),
            prefix: String::new(),
            registry_name: None,
            label_matches: Vec::new(),
            excluded_labels: Vec::new(),
            strict_label_matching: false,
            delivery: DeliveryMode::default(),
            max_in_flight: default_max_in_flight(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            retry: RetryConfiguration::default(),
        }
    }
}

impl ReporterConfiguration {
    /// Creates a new `ReporterConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// If any value is out of range, an error describing the first offending value is returned.
    pub fn validate(&self) -> Result<(), ReporterError> {
        let invalid = |reason: String| Err(ReporterError::ConfigInvalid { reason });

        if self.batch_size < 1 {
            return invalid("batch_size must be at least 1".to_string());
        }
        if positive_duration_from_secs(self.batch_delay_secs).is_none() {
            return invalid(format!(
                "batch_delay_secs must be greater than zero and at most {} (got {})",
                MAX_CONFIGURED_DURATION.as_secs(),
                self.batch_delay_secs
            ));
        }
        if self.buffer_capacity < self.batch_size {
            return invalid(format!(
                "buffer_capacity ({}) must be at least batch_size ({})",
                self.buffer_capacity, self.batch_size
            ));
        }
        if self.delivery == DeliveryMode::Pipelined && self.max_in_flight < 1 {
            return invalid("max_in_flight must be at least 1".to_string());
        }
        if positive_duration_from_secs(self.shutdown_timeout_secs).is_none() {
            return invalid(format!(
                "shutdown_timeout_secs must be greater than zero and at most {} (got {})",
                MAX_CONFIGURED_DURATION.as_secs(),
                self.shutdown_timeout_secs
            ));
        }
        self.retry.validate().or_else(invalid)
    }

    /// Returns the batch delay.
    ///
    /// Out-of-range values, which `validate` rejects, saturate at the longest configurable duration.
    pub fn batch_delay(&self) -> Duration {
        duration_from_secs(self.batch_delay_secs).unwrap_or(MAX_CONFIGURED_DURATION)
    }

    /// Returns the shutdown timeout.
    ///
    /// Out-of-range values, which `validate` rejects, saturate at the longest configurable duration.
    pub fn shutdown_timeout(&self) -> Duration {
        duration_from_secs(self.shutdown_timeout_secs).unwrap_or(MAX_CONFIGURED_DURATION)
    }

    /// Returns the effective registry name.
    pub fn registry_name(&self) -> &str {
        self.registry_name.as_deref().unwrap_or(crate::registry::DEFAULT_REGISTRY_NAME)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use tally_config::ConfigurationLoader;

    use super::*;
    use crate::matcher::MatchType;

    fn load(raw: &str) -> ReporterConfiguration {
        let config = ConfigurationLoader::default().from_yaml_str(raw).unwrap().into_generic();
        ReporterConfiguration::from_configuration(&config).unwrap()
    }

    #[test]
    fn defaults() {
        let config = load("{}");
        assert_eq!(config, ReporterConfiguration::default());
        assert!(!config.enabled);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_delay(), Duration::from_secs(1));
        assert_eq!(config.registry_name(), "default");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_document() {
        let config = load(
            r#"
enabled: "true"
batch_size: 3
batch_delay_secs: 5
buffer_capacity: 100
overflow_policy: block
disabled_metrics_categories: [EVENT_BUS, NAMED_POOLS]
prefix: "app."
registry_name: ""
label_matches:
  - label: local
    value: "localhost:8080"
    alias: web
  - label: path
    type: REGEX
    value: "/api/.*"
    domain: HTTP_SERVER
excluded_labels: [remote]
strict_label_matching: 1
delivery: pipelined
max_in_flight: 2
retry:
  max_attempts: 5
  drop_client_errors: "true"
"#,
        );

        assert!(config.enabled);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.batch_delay(), Duration::from_secs(5));
        assert_eq!(config.overflow_policy, OverflowPolicy::Block);
        assert_eq!(
            config.disabled_metrics_categories,
            vec![MetricCategory::EventBus, MetricCategory::NamedPools]
        );
        assert_eq!(config.registry_name, None);
        assert_eq!(config.label_matches.len(), 2);
        assert_eq!(config.label_matches[0].match_type, MatchType::Equals);
        assert_eq!(config.label_matches[1].match_type, MatchType::Regex);
        assert_eq!(config.label_matches[1].domain, Some(MetricCategory::HttpServer));
        assert!(config.strict_label_matching);
        assert_eq!(config.delivery, DeliveryMode::Pipelined);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert!(config.retry.drop_client_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let cases = [
            ReporterConfiguration {
                batch_size: 0,
                ..Default::default()
            },
            ReporterConfiguration {
                batch_delay_secs: 0.0,
                ..Default::default()
            },
            ReporterConfiguration {
                batch_delay_secs: f64::NAN,
                ..Default::default()
            },
            ReporterConfiguration {
                buffer_capacity: 10,
                batch_size: 20,
                ..Default::default()
            },
            ReporterConfiguration {
                shutdown_timeout_secs: -1.0,
                ..Default::default()
            },
            ReporterConfiguration {
                retry: RetryConfiguration {
                    max_attempts: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            ReporterConfiguration {
                batch_delay_secs: 1e20,
                ..Default::default()
            },
            ReporterConfiguration {
                shutdown_timeout_secs: f64::INFINITY,
                ..Default::default()
            },
            ReporterConfiguration {
                retry: RetryConfiguration {
                    backoff_max_secs: 1e20,
                    ..Default::default()
                },
                ..Default::default()
            },
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(ReporterError::ConfigInvalid { .. })),
                "expected {:?} to be invalid",
                config
            );
        }
    }
}
