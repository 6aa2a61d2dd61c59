//! Sinks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_config::GenericConfiguration;
use tally_core::{ReporterError, Sink};
use tally_error::GenericError;
use tracing::debug;

mod http;
pub use self::http::{HttpSink, HttpSinkConfiguration};

mod log;
pub use self::log::{LogSink, LogSinkConfiguration};

mod pull;
pub use self::pull::{PullSink, PullSinkConfiguration};

/// Sink configuration.
///
/// Selected by the `type` field:
///
/// ```yaml
/// sink:
///   type: http
///   endpoint: https://metrics.example.com/ingest
///   token: s3cr3t
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfiguration {
    /// Push batches to an HTTP endpoint.
    Http(HttpSinkConfiguration),

    /// Hold batches for a scraper.
    Pull(PullSinkConfiguration),

    /// Log batches.
    Log(LogSinkConfiguration),
}

impl Default for SinkConfiguration {
    fn default() -> Self {
        Self::Log(LogSinkConfiguration::default())
    }
}

impl SinkConfiguration {
    /// Reads the sink configuration from the `sink` key, falling back to the log sink if it's absent.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.try_get_typed("sink")?.unwrap_or_default())
    }

    /// Builds the configured sink.
    ///
    /// # Errors
    ///
    /// If the sink settings are invalid, an error is returned.
    pub fn build(&self) -> Result<Arc<dyn Sink>, ReporterError> {
        let sink: Arc<dyn Sink> = match self {
            Self::Http(config) => Arc::new(config.build().map_err(|source| ReporterError::Sink { source })?),
            Self::Pull(config) => Arc::new(config.build().map_err(|source| ReporterError::Sink { source })?),
            Self::Log(config) => Arc::new(config.build()),
        };

        debug!(sink = sink.name(), "Built sink.");
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use tally_config::ConfigurationLoader;

    use super::*;

    fn load(raw: &str) -> SinkConfiguration {
        let config = ConfigurationLoader::default().from_yaml_str(raw).unwrap().into_generic();
        SinkConfiguration::from_configuration(&config).unwrap()
    }

    #[test]
    fn defaults_to_log() {
        assert_eq!(load("batch_size: 10\n"), SinkConfiguration::default());
    }

    #[test]
    fn http_with_defaults() {
        let config = load("sink:\n  type: http\n  endpoint: http://localhost:9000/write\n");
        assert_eq!(
            config,
            SinkConfiguration::Http(HttpSinkConfiguration::new("http://localhost:9000/write"))
        );
    }

    #[test]
    fn http_with_everything() {
        let raw = r#"
sink:
  type: http
  endpoint: https://metrics.example.com/ingest
  headers:
    x-tenant: acme
  gzip: "false"
  username: scott
  password: tiger
  request_timeout_secs: 2.5
"#;
        let SinkConfiguration::Http(config) = load(raw) else {
            panic!("expected an HTTP sink");
        };
        assert!(!config.gzip);
        assert_eq!(config.headers.get("x-tenant").map(String::as_str), Some("acme"));
        assert_eq!(config.username.as_deref(), Some("scott"));
        assert_eq!(config.password.as_deref(), Some("tiger"));
        assert_eq!(config.token, None);
        assert_eq!(config.request_timeout_secs, 2.5);
    }

    #[test]
    fn pull_step() {
        assert_eq!(
            load("sink:\n  type: pull\n  step_secs: 30\n"),
            SinkConfiguration::Pull(PullSinkConfiguration { step_secs: 30.0 })
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let config = ConfigurationLoader::default()
            .from_yaml_str("sink:\n  type: carrier_pigeon\n")
            .unwrap()
            .into_generic();
        assert!(SinkConfiguration::from_configuration(&config).is_err());
    }

    #[tokio::test]
    async fn builds_each_kind() {
        assert_eq!(SinkConfiguration::default().build().unwrap().name(), "log");
        assert_eq!(
            SinkConfiguration::Pull(PullSinkConfiguration::default())
                .build()
                .unwrap()
                .name(),
            "pull"
        );
        assert_eq!(
            SinkConfiguration::Http(HttpSinkConfiguration::new("http://localhost:9000/"))
                .build()
                .unwrap()
                .name(),
            "http"
        );

        let invalid = SinkConfiguration::Http(HttpSinkConfiguration::new("::"));
        assert!(matches!(invalid.build(), Err(ReporterError::Sink { .. })));
    }
}
