//! Process bootstrap helpers.
//!
//! This crate provides the pieces needed to get a tally process off the ground before any reporter starts, such as
//! initializing logging.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod logging;

/// Common imports.
pub mod prelude {
    pub use super::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration, LoggingGuard};
}
