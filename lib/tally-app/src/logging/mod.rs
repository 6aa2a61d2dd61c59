//! Logging.

use tally_error::{generic_error, GenericError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer as _};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

mod layer;
use self::layer::build_formatting_layer;

/// Keeps the logging backend alive.
///
/// Log lines are written by a background worker. Dropping the guard flushes whatever is still queued, so it must be
/// held until the process is about to exit.
#[must_use = "dropping the guard stops log output"]
pub struct LoggingGuard {
    _worker_guard: WorkerGuard,
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Events are filtered by `log_level` and written to standard output, either as JSON objects (`log_format_json`) or
/// as single human-readable lines.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<LoggingGuard, GenericError> {
    let (nb_stdout, worker_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(build_formatting_layer(config, nb_stdout).with_filter(config.log_level.as_env_filter()))
        .try_init()
        .map_err(|e| generic_error!("Failed to initialize logging: {}", e))?;

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
    })
}
