use serde::Serialize;
use tally_components::sinks::SinkConfiguration;
use tally_config::GenericConfiguration;
use tally_core::ReporterConfiguration;
use tally_error::{ErrorContext as _, GenericError};

#[derive(Serialize)]
struct EffectiveConfiguration<'a> {
    #[serde(flatten)]
    reporter: &'a ReporterConfiguration,
    sink: &'a SinkConfiguration,
}

/// Loads and validates the reporter and sink configuration, and renders it as YAML.
pub fn render_effective_configuration(config: &GenericConfiguration) -> Result<String, GenericError> {
    let reporter_config =
        ReporterConfiguration::from_configuration(config).error_context("Failed to load reporter configuration.")?;
    reporter_config
        .validate()
        .error_context("Invalid reporter configuration.")?;

    let sink_config = SinkConfiguration::from_configuration(config).error_context("Failed to load sink configuration.")?;
    sink_config.build().error_context("Invalid sink configuration.")?;

    serde_yaml::to_string(&EffectiveConfiguration {
        reporter: &reporter_config,
        sink: &sink_config,
    })
    .error_context("Failed to render configuration.")
}

/// Handles the `config` subcommand.
pub fn handle_config_command(config: &GenericConfiguration) -> Result<(), GenericError> {
    let rendered = render_effective_configuration(config)?;
    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use tally_config::ConfigurationLoader;

    use super::*;

    fn render(raw: &str) -> Result<serde_yaml::Value, GenericError> {
        let config = ConfigurationLoader::default().from_yaml_str(raw)?.into_generic();
        let rendered = render_effective_configuration(&config)?;
        Ok(serde_yaml::from_str(&rendered)?)
    }

    #[test]
    fn renders_defaults_filled_in() {
        let rendered = render("enabled: true\nbatch_size: 10\n").unwrap();

        assert_eq!(rendered["enabled"], serde_yaml::Value::Bool(true));
        assert_eq!(rendered["batch_size"].as_u64(), Some(10));
        assert_eq!(rendered["batch_delay_secs"].as_f64(), Some(1.0));
        assert_eq!(rendered["retry"]["max_attempts"].as_u64(), Some(3));
        assert_eq!(rendered["sink"]["type"].as_str(), Some("log"));
    }

    #[test]
    fn rejects_invalid_reporter_settings() {
        assert!(render("batch_size: 0\n").is_err());
        assert!(render("batch_size: 100\nbuffer_capacity: 10\n").is_err());
    }

    #[test]
    fn rejects_invalid_sink_settings() {
        assert!(render("sink:\n  type: http\n  endpoint: \"not a url\"\n").is_err());
    }
}
