//! Encoders and sinks for tally reporters.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod encoders;
pub mod sinks;
