use std::time::Duration;

use snafu::Snafu;
use tally_error::GenericError;

/// A reporter error.
///
/// Every variant is raised at a lifecycle boundary (configuration, start, stop). Nothing that happens to an individual
/// sample or batch surfaces as a `ReporterError`: those are counted and logged instead.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ReporterError {
    /// The reporter configuration failed validation.
    #[snafu(display("Invalid reporter configuration: {}", reason))]
    ConfigInvalid {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// A label match rule could not be compiled.
    #[snafu(display("Invalid match rule for label '{}': pattern '{}' is not a valid regular expression.", label, pattern))]
    MatchRuleInvalid {
        /// Label the rule applies to.
        label: String,

        /// The offending pattern.
        pattern: String,

        /// Error source.
        source: regex::Error,
    },

    /// Stopping the reporter did not complete within the shutdown timeout.
    #[snafu(display("Reporter did not stop within {:?}; pending batches were abandoned.", timeout))]
    ShutdownTimeout {
        /// The configured shutdown timeout.
        timeout: Duration,
    },

    /// The sink could not be constructed.
    #[snafu(display("Failed to build sink."))]
    Sink {
        /// Error source.
        source: GenericError,
    },
}
