//! Metric samples.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered label set of a sample.
pub type Labels = IndexMap<String, String>;

/// Metric category.
///
/// Categories classify samples by the subsystem that produced them, and are used to disable whole groups of metrics
/// or to scope label match rules to a single group.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricCategory {
    /// TCP servers.
    NetServer,

    /// TCP clients.
    NetClient,

    /// HTTP servers.
    HttpServer,

    /// HTTP clients.
    HttpClient,

    /// Datagram sockets.
    DatagramSocket,

    /// The event bus.
    EventBus,

    /// Named worker pools.
    NamedPools,

    /// Deployed units of work.
    Verticles,

    /// Anything recorded directly by user code.
    Custom,
}

impl MetricCategory {
    /// Returns the configuration name of this category.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NetServer => "NET_SERVER",
            Self::NetClient => "NET_CLIENT",
            Self::HttpServer => "HTTP_SERVER",
            Self::HttpClient => "HTTP_CLIENT",
            Self::DatagramSocket => "DATAGRAM_SOCKET",
            Self::EventBus => "EVENT_BUS",
            Self::NamedPools => "NAMED_POOLS",
            Self::Verticles => "VERTICLES",
            Self::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of instrument a sample was taken from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Monotonic counter.
    Counter,

    /// Point-in-time gauge.
    Gauge,

    /// A single bucket of a histogram.
    HistogramBucket,
}

/// A single timestamped metric observation.
///
/// Samples are immutable. Operations that change a sample, such as rewriting its labels or prefixing its name, return
/// a new sample that shares every untouched field with the original.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    name: Arc<str>,
    category: MetricCategory,
    labels: Arc<Labels>,
    value: f64,
    timestamp_ms: u64,
    kind: SampleKind,
}

impl Sample {
    /// Creates a new `Sample` timestamped with the current time.
    pub fn new<N>(name: N, category: MetricCategory, labels: Labels, value: f64, kind: SampleKind) -> Self
    where
        N: Into<Arc<str>>,
    {
        Self::with_timestamp(
            name,
            category,
            labels,
            value,
            kind,
            tally_common::time::get_unix_timestamp_millis(),
        )
    }

    /// Creates a new `Sample` with an explicit timestamp, in milliseconds since the Unix epoch.
    pub fn with_timestamp<N>(
        name: N, category: MetricCategory, labels: Labels, value: f64, kind: SampleKind, timestamp_ms: u64,
    ) -> Self
    where
        N: Into<Arc<str>>,
    {
        Self {
            name: name.into(),
            category,
            labels: Arc::new(labels),
            value,
            timestamp_ms,
            kind,
        }
    }

    /// Returns the name of the sample.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the category of the sample.
    pub fn category(&self) -> MetricCategory {
        self.category
    }

    /// Returns the labels of the sample, in insertion order.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Returns the value of the sample.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Returns the timestamp of the sample, in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Returns the instrument kind of the sample.
    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    /// Returns `true` if `self` and `other` share the same label storage.
    pub fn shares_labels_with(&self, other: &Sample) -> bool {
        Arc::ptr_eq(&self.labels, &other.labels)
    }

    /// Returns a copy of this sample with the given labels.
    pub fn with_labels(&self, labels: Labels) -> Self {
        Self {
            labels: Arc::new(labels),
            ..self.clone()
        }
    }

    /// Returns a copy of this sample with `prefix` prepended to its name.
    ///
    /// An empty prefix returns a cheap clone.
    pub fn with_name_prefix(&self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self.clone();
        }

        Self {
            name: Arc::from(format!("{}{}", prefix, self.name)),
            ..self.clone()
        }
    }
}

/// A sample as it appears on the wire.
///
/// This is the shape producers submit to the CLI, and the shape the JSON encoder writes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SampleRecord {
    /// Metric name.
    pub name: String,

    /// Metric category.
    #[serde(default = "default_category")]
    pub category: MetricCategory,

    /// Labels, in order.
    #[serde(default)]
    pub labels: Labels,

    /// Observed value.
    pub value: f64,

    /// Instrument kind.
    #[serde(default = "default_kind")]
    pub kind: SampleKind,

    /// Timestamp in milliseconds since the Unix epoch, or `None` to use the time of ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
}

const fn default_category() -> MetricCategory {
    MetricCategory::Custom
}

const fn default_kind() -> SampleKind {
    SampleKind::Gauge
}

impl From<SampleRecord> for Sample {
    fn from(record: SampleRecord) -> Self {
        match record.timestamp_ms {
            Some(ts) => Sample::with_timestamp(
                record.name,
                record.category,
                record.labels,
                record.value,
                record.kind,
                ts,
            ),
            None => Sample::new(record.name, record.category, record.labels, record.value, record.kind),
        }
    }
}

impl From<&Sample> for SampleRecord {
    fn from(sample: &Sample) -> Self {
        Self {
            name: sample.name().to_string(),
            category: sample.category(),
            labels: sample.labels().clone(),
            value: sample.value(),
            kind: sample.kind(),
            timestamp_ms: Some(sample.timestamp_ms()),
        }
    }
}

/// Builds a label set from key/value pairs.
pub fn labels<I, K, V>(pairs: I) -> Labels
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
