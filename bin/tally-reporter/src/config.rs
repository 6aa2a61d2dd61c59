use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Start a reporter and feed it samples from standard input, one JSON object per line.
    ///
    /// Runs until standard input is closed or the process is interrupted, then flushes, stops the reporter, and
    /// prints its counters.
    Run(RunConfig),

    /// Print the effective configuration after validating it.
    Config(ConfigConfig),
}

impl Action {
    /// Returns the configuration file the action reads.
    pub fn config_path(&self) -> &Path {
        match self {
            Self::Run(config) => &config.config,
            Self::Config(config) => &config.config,
        }
    }
}

/// Run configuration.
#[derive(Args, Debug)]
pub struct RunConfig {
    /// Path to the configuration file. Read as JSON if it ends in `.json`, YAML otherwise.
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}

/// Config configuration.
#[derive(Args, Debug)]
pub struct ConfigConfig {
    /// Path to the configuration file. Read as JSON if it ends in `.json`, YAML otherwise.
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}
