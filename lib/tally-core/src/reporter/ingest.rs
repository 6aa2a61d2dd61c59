use std::sync::Arc;

use tracing::{debug, trace};

use super::stats::Counters;
use crate::{
    buffer::{BufferFull, SampleBuffer},
    filter::CategoryFilter,
    matcher::LabelMatcher,
    sample::Sample,
    trigger::ThresholdNotifier,
};

/// Producer-facing half of a running reporter.
///
/// Every step here is infallible from the producer's point of view: samples that don't make it into the buffer are
/// counted, never reported back as errors.
#[derive(Debug)]
pub(crate) struct Ingest {
    filter: CategoryFilter,
    matcher: LabelMatcher,
    prefix: String,
    buffer: Arc<SampleBuffer>,
    notifier: ThresholdNotifier,
    counters: Arc<Counters>,
}

impl Ingest {
    pub(crate) fn new(
        filter: CategoryFilter, matcher: LabelMatcher, prefix: String, buffer: Arc<SampleBuffer>,
        notifier: ThresholdNotifier, counters: Arc<Counters>,
    ) -> Self {
        Self {
            filter,
            matcher,
            prefix,
            buffer,
            notifier,
            counters,
        }
    }

    fn prepare(&self, sample: &Sample) -> Option<Sample> {
        if !self.filter.accept(sample) {
            trace!(name = sample.name(), category = %sample.category(), "Sample category disabled.");
            self.counters.sample_filtered();
            return None;
        }

        match self.matcher.evaluate(sample) {
            Some(matched) => Some(matched.with_name_prefix(&self.prefix)),
            None => {
                trace!(name = sample.name(), "Sample rejected by strict label matching.");
                self.counters.sample_rejected();
                None
            }
        }
    }

    fn appended(&self, result: Result<usize, BufferFull>) {
        match result {
            Ok(buffered) => self.notifier.observe(buffered),
            Err(e) => {
                debug!(error = %e, "Dropping sample.");
                self.counters.sample_dropped();
            }
        }
    }

    /// Records a sample without waiting.
    pub(crate) fn record(&self, sample: &Sample) {
        if let Some(prepared) = self.prepare(sample) {
            self.appended(self.buffer.try_append(prepared));
        }
    }

    /// Records a sample, waiting for buffer capacity if the overflow policy says so.
    pub(crate) async fn submit(&self, sample: &Sample) {
        if let Some(prepared) = self.prepare(sample) {
            let result = self.buffer.append(prepared).await;
            self.appended(result);
        }
    }
}
