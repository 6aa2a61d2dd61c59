use std::sync::{
    atomic::{AtomicU64, Ordering::Relaxed},
    Arc,
};

use serde::Serialize;
use tally_metrics::static_metrics;

static_metrics!(
    name => Telemetry,
    prefix => reporter,
    labels => [registry: String],
    metrics => [
        counter(samples_dropped),
        counter(samples_filtered),
        counter(samples_rejected),
        counter(batches_sent),
        counter(batches_failed),
        gauge(last_flush_timestamp),
    ],
);

/// Point-in-time view of a reporter's counters.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ReporterStats {
    /// Samples dropped because the buffer was full.
    pub samples_dropped: u64,

    /// Samples discarded because their category is disabled.
    pub samples_filtered: u64,

    /// Samples rejected by strict label matching.
    pub samples_rejected: u64,

    /// Batches transmitted successfully.
    pub batches_sent: u64,

    /// Batches dropped after encoding failed or retries were exhausted.
    pub batches_failed: u64,

    /// When the last non-empty flush happened, in milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_flush_timestamp_ms: Option<u64>,
}

/// Reporter counters, mirrored into the `metrics` facade.
#[derive(Debug)]
pub(crate) struct Counters {
    samples_dropped: AtomicU64,
    samples_filtered: AtomicU64,
    samples_rejected: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    last_flush_timestamp_ms: AtomicU64,
    telemetry: Telemetry,
}

impl Counters {
    pub(crate) fn new(registry: &str) -> Self {
        Self {
            samples_dropped: AtomicU64::new(0),
            samples_filtered: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            last_flush_timestamp_ms: AtomicU64::new(0),
            telemetry: Telemetry::new(registry.to_string()),
        }
    }

    pub(crate) fn sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Relaxed);
        self.telemetry.samples_dropped().increment(1);
    }

    pub(crate) fn sample_filtered(&self) {
        self.samples_filtered.fetch_add(1, Relaxed);
        self.telemetry.samples_filtered().increment(1);
    }

    pub(crate) fn sample_rejected(&self) {
        self.samples_rejected.fetch_add(1, Relaxed);
        self.telemetry.samples_rejected().increment(1);
    }

    pub(crate) fn batch_sent(&self) {
        self.batches_sent.fetch_add(1, Relaxed);
        self.telemetry.batches_sent().increment(1);
    }

    pub(crate) fn batch_failed(&self) {
        self.batches_failed.fetch_add(1, Relaxed);
        self.telemetry.batches_failed().increment(1);
    }

    pub(crate) fn flushed_at(&self, timestamp_ms: u64) {
        self.last_flush_timestamp_ms.store(timestamp_ms, Relaxed);
        self.telemetry.last_flush_timestamp().set(timestamp_ms as f64);
    }

    pub(crate) fn snapshot(&self) -> ReporterStats {
        let last_flush = self.last_flush_timestamp_ms.load(Relaxed);
        ReporterStats {
            samples_dropped: self.samples_dropped.load(Relaxed),
            samples_filtered: self.samples_filtered.load(Relaxed),
            samples_rejected: self.samples_rejected.load(Relaxed),
            batches_sent: self.batches_sent.load(Relaxed),
            batches_failed: self.batches_failed.load(Relaxed),
            last_flush_timestamp_ms: (last_flush != 0).then_some(last_flush),
        }
    }
}

/// Read access to a reporter's counters that outlives the reporter.
#[derive(Clone, Debug)]
pub struct StatsHandle {
    counters: Arc<Counters>,
}

impl StatsHandle {
    pub(crate) fn new(counters: Arc<Counters>) -> Self {
        Self { counters }
    }

    /// Returns the current counters.
    pub fn snapshot(&self) -> ReporterStats {
        self.counters.snapshot()
    }
}
