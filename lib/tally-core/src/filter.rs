use ahash::AHashSet;

use crate::sample::{MetricCategory, Sample};

/// Drops samples whose category is disabled.
///
/// Applied at ingest, before a sample is buffered, so filtered samples never count as dropped.
#[derive(Clone, Debug, Default)]
pub struct CategoryFilter {
    disabled: AHashSet<MetricCategory>,
}

impl CategoryFilter {
    /// Creates a new `CategoryFilter` that rejects the given categories.
    pub fn new<I>(disabled: I) -> Self
    where
        I: IntoIterator<Item = MetricCategory>,
    {
        Self {
            disabled: disabled.into_iter().collect(),
        }
    }

    /// Returns `true` if the sample's category is enabled.
    pub fn accept(&self, sample: &Sample) -> bool {
        !self.disabled.contains(&sample.category())
    }

    /// Returns `true` if the given category is disabled.
    pub fn is_disabled(&self, category: MetricCategory) -> bool {
        self.disabled.contains(&category)
    }
}
