//! Common helpers shared across tally crates.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod deser;
pub mod task;
pub mod time;
