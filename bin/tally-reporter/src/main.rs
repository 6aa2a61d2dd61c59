//! Command-line front end for tally reporters.
//!
//! Reads samples as JSON lines from standard input and reports them through a configured sink.

#![deny(warnings)]
#![deny(missing_docs)]

use std::path::Path;

use clap::Parser as _;
use tally_app::prelude::*;
use tally_config::{ConfigurationLoader, GenericConfiguration};
use tally_error::{ErrorContext as _, GenericError};
use tracing::{error, info};

mod cli;
use self::cli::{handle_config_command, handle_run_command};

mod config;
use self::config::{Action, Cli};

/// Prefix for environment variable overrides, such as `TALLY_BATCH_SIZE`.
const ENV_VAR_PREFIX: &str = "TALLY";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = match load_configuration(cli.action.config_path()) {
        Ok(configuration) => configuration,
        Err(e) => fatal_and_exit(format!("failed to load configuration: {:?}", e)),
    };

    let logging_config = match LoggingConfiguration::from_configuration(&configuration) {
        Ok(logging_config) => logging_config,
        Err(e) => fatal_and_exit(format!("invalid logging configuration: {:?}", e)),
    };
    let logging_guard = match initialize_logging(&logging_config) {
        Ok(guard) => guard,
        Err(e) => fatal_and_exit(format!("failed to initialize logging: {}", e)),
    };

    let result = match cli.action {
        Action::Run(_) => handle_run_command(&configuration).await,
        Action::Config(_) => handle_config_command(&configuration),
    };

    match result {
        Ok(()) => info!("tally-reporter stopped."),
        Err(e) => {
            error!("{:?}", e);
            drop(logging_guard);
            std::process::exit(1);
        }
    }
}

fn load_configuration(path: &Path) -> Result<GenericConfiguration, GenericError> {
    let loader = ConfigurationLoader::default();
    let loader = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => loader.from_json(path),
        _ => loader.from_yaml(path),
    };
    let configuration = loader
        .with_error_context(|| format!("Failed to load configuration file '{}'.", path.display()))?
        .from_environment(ENV_VAR_PREFIX)?
        .into_generic();

    Ok(configuration)
}
