//! Metric sample batching and reporting.
//!
//! Samples flow from producers through a [`CategoryFilter`] and a [`LabelMatcher`] into a bounded [`SampleBuffer`].
//! A [`FlushTrigger`] decides when the buffer is drained into sequenced [`Batch`]es, which the [`Reporter`] hands to a
//! [`Sink`] with bounded, exponentially backed-off retries. Reporters attach to named registries handed out by a
//! [`RegistryCoordinator`], so several reporters can share instrumentation.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod buffer;
pub use self::buffer::{BufferFull, OverflowPolicy, SampleBuffer};

pub mod config;
pub use self::config::{DeliveryMode, ReporterConfiguration};

mod error;
pub use self::error::ReporterError;

mod filter;
pub use self::filter::CategoryFilter;

pub mod matcher;
pub use self::matcher::{LabelMatcher, MatchRule, MatchType};

pub mod registry;
pub use self::registry::{Registry, RegistryCoordinator, RegistryHandle, DEFAULT_REGISTRY_NAME};

mod reporter;
pub use self::reporter::{Reporter, ReporterStats, StatsHandle};

pub mod retry;

pub mod sample;
pub use self::sample::{labels, Labels, MetricCategory, Sample, SampleKind, SampleRecord};

pub mod sink;
pub use self::sink::{Batch, DeliveryError, EncodeError, Sink, TransportError};

pub mod trigger;
pub use self::trigger::{FlushReason, FlushTrigger, ThresholdNotifier, TriggerState};

#[cfg(test)]
mod testing;
