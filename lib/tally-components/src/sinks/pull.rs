use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tally_common::time::{positive_duration_from_secs, MAX_CONFIGURED_DURATION};
use tally_core::{Batch, EncodeError, Sink, TransportError};
use tally_error::{generic_error, GenericError};
use tokio::time::Instant;
use tracing::trace;

use crate::encoders::JsonEncoder;

const fn default_step_secs() -> f64 {
    10.0
}

/// Pull sink configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PullSinkConfiguration {
    /// Polling step, in seconds.
    ///
    /// Payloads not scraped within one step of being transmitted are discarded. Defaults to 10 seconds.
    #[serde(default = "default_step_secs")]
    pub step_secs: f64,
}

impl Default for PullSinkConfiguration {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
        }
    }
}

impl PullSinkConfiguration {
    /// Builds the sink.
    ///
    /// # Errors
    ///
    /// If the step is not a positive number of seconds, an error is returned.
    pub fn build(&self) -> Result<PullSink, GenericError> {
        let step = positive_duration_from_secs(self.step_secs).ok_or_else(|| {
            generic_error!(
                "step_secs must be greater than zero and at most {} (got {}).",
                MAX_CONFIGURED_DURATION.as_secs(),
                self.step_secs
            )
        })?;

        Ok(PullSink::new(step))
    }
}

/// Pull sink.
///
/// Holds encoded payloads until a scraper collects them with [`scrape`][Self::scrape]. Payloads older than one polling
/// step are discarded, so a scraper that falls behind only ever sees the most recent window.
#[derive(Debug)]
pub struct PullSink {
    step: Duration,
    retained: Mutex<VecDeque<(Instant, Bytes)>>,
}

impl PullSink {
    /// Creates a new `PullSink` with the given polling step.
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            retained: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the polling step.
    pub fn step(&self) -> Duration {
        self.step
    }

    fn lock_and_expire(&self) -> MutexGuard<'_, VecDeque<(Instant, Bytes)>> {
        let mut retained = self.retained.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        while let Some((at, _)) = retained.front() {
            if now.duration_since(*at) <= self.step {
                break;
            }
            retained.pop_front();
        }
        retained
    }

    /// Returns every payload transmitted within the last polling step, oldest first, and clears them.
    pub fn scrape(&self) -> Vec<Bytes> {
        self.lock_and_expire().drain(..).map(|(_, payload)| payload).collect()
    }

    /// Returns the number of payloads waiting to be scraped.
    pub fn retained(&self) -> usize {
        self.lock_and_expire().len()
    }
}

#[async_trait]
impl Sink for PullSink {
    fn name(&self) -> &'static str {
        "pull"
    }

    async fn encode(&self, batch: &Batch) -> Result<Bytes, EncodeError> {
        JsonEncoder.encode(batch)
    }

    async fn transmit(&self, payload: Bytes) -> Result<(), TransportError> {
        let mut retained = self.lock_and_expire();
        retained.push_back((Instant::now(), payload));
        trace!(retained = retained.len(), "Retained payload for scraping.");
        Ok(())
    }
}
