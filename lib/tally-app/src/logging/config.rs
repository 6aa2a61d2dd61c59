use serde::Deserialize;
use serde_with::serde_as;
use tally_common::deser::PermissiveBool;
use tally_config::GenericConfiguration;
use tally_error::{generic_error, ErrorContext as _, GenericError};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

const fn default_false() -> bool {
    false
}

/// Logging configuration.
#[serde_as]
#[derive(Debug, Deserialize)]
pub struct LoggingConfiguration {
    /// Filtering directives, in `EnvFilter` syntax.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to write logs as JSON.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default = "default_false")]
    pub log_format_json: bool,
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: default_false(),
        }
    }
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` instance from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let logging_config = config.as_typed()?;
        Ok(logging_config)
    }
}

/// A set of log filtering directives.
#[derive(Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel(EnvFilter);

impl LogLevel {
    /// Returns the directives as an `EnvFilter`.
    pub fn as_env_filter(&self) -> EnvFilter {
        EnvFilter::builder().parse_lossy(self.0.to_string())
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self(EnvFilter::default().add_directive(level.into()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(value)
            .map(Self)
            .error_context("Failed to parse valid log level.")
    }
}

#[cfg(test)]
mod tests {
    use tally_config::ConfigurationLoader;

    use super::*;

    fn load(raw: &str) -> Result<LoggingConfiguration, GenericError> {
        let config = ConfigurationLoader::default().from_yaml_str(raw)?.into_generic();
        LoggingConfiguration::from_configuration(&config)
    }

    #[test]
    fn defaults() {
        let config = load("batch_size: 10\n").unwrap();
        assert!(!config.log_format_json);
        assert_eq!(config.log_level.as_env_filter().to_string().to_lowercase(), "info");
    }

    #[test]
    fn directives_and_permissive_json_flag() {
        let config = load("log_level: \"warn,tally_core=debug\"\nlog_format_json: \"1\"\n").unwrap();
        assert!(config.log_format_json);

        let directives = config.log_level.as_env_filter().to_string().to_lowercase();
        assert!(directives.contains("tally_core=debug"));
        assert!(directives.contains("warn"));
    }

    #[test]
    fn empty_or_invalid_level_is_rejected() {
        assert!(load("log_level: \"\"\n").is_err());
        assert!(load("log_level: \"tally_core=loud\"\n").is_err());
    }
}
