use std::sync::Arc;

use tally_common::task::JoinSetExt as _;
use tokio::{select, sync::mpsc, task::JoinSet, time::sleep};
use tracing::{debug, error, warn};

use super::stats::Counters;
use crate::{
    config::DeliveryMode,
    retry::RetryPolicy,
    sink::{Batch, DeliveryError, Sink},
};

/// Delivers batches to a sink, retrying failed transmissions.
#[derive(Clone)]
pub(crate) struct BatchSender {
    sink: Arc<dyn Sink>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
}

impl BatchSender {
    pub(crate) fn new(sink: Arc<dyn Sink>, policy: RetryPolicy, counters: Arc<Counters>) -> Self {
        Self { sink, policy, counters }
    }

    /// Sends a batch, retrying per the retry policy.
    ///
    /// The outcome is counted either way: one `batches_sent` on success, one `batches_failed` otherwise.
    pub(crate) async fn send(&self, batch: Batch) -> Result<(), DeliveryError> {
        let result = self.try_send(&batch).await;
        match &result {
            Ok(attempts) => {
                debug!(
                    sink = self.sink.name(),
                    sequence = batch.sequence(),
                    batch_len = batch.len(),
                    attempts,
                    "Batch sent."
                );
                self.counters.batch_sent();
            }
            Err(e) => {
                error!(sink = self.sink.name(), batch_len = batch.len(), error = %e, "Dropping batch.");
                self.counters.batch_failed();
            }
        }
        result.map(|_| ())
    }

    async fn try_send(&self, batch: &Batch) -> Result<u32, DeliveryError> {
        let sequence = batch.sequence();
        let payload = self
            .sink
            .encode(batch)
            .await
            .map_err(|source| DeliveryError::Encode { sequence, source })?;

        let mut failed = 0;
        loop {
            let error = match self.sink.transmit(payload.clone()).await {
                Ok(()) => return Ok(failed + 1),
                Err(e) => e,
            };
            failed += 1;

            let delay = if self.policy.drops(&error) {
                None
            } else {
                self.policy.next_delay(failed)
            };
            match delay {
                Some(delay) => {
                    warn!(
                        sink = self.sink.name(),
                        sequence,
                        attempt = failed,
                        error = %error,
                        ?delay,
                        "Failed to transmit batch. Retrying."
                    );
                    sleep(delay).await;
                }
                None => {
                    return Err(DeliveryError::Transport {
                        sequence,
                        attempts: failed,
                        source: error,
                    })
                }
            }
        }
    }
}

/// Drains batches from the flush task and hands them to the sender until the channel closes.
pub(crate) async fn run_send_loop(
    mut batches_rx: mpsc::Receiver<Batch>, sender: BatchSender, delivery: DeliveryMode, max_in_flight: usize,
) {
    match delivery {
        DeliveryMode::Ordered => {
            // The next batch isn't even received until the previous one is done.
            while let Some(batch) = batches_rx.recv().await {
                let _ = sender.send(batch).await;
            }
        }
        DeliveryMode::Pipelined => {
            let mut in_flight = JoinSet::new();
            let max_in_flight = max_in_flight.max(1);

            loop {
                select! {
                    maybe_batch = batches_rx.recv(), if in_flight.len() < max_in_flight => match maybe_batch {
                        Some(batch) => {
                            let sender = sender.clone();
                            in_flight.spawn_traced(async move { sender.send(batch).await });
                        }
                        None => break,
                    },
                    Some(result) = in_flight.join_next() => {
                        if let Err(e) = result {
                            error!(error = %e, "Send task failed unexpectedly.");
                        }
                    }
                }
            }

            while let Some(result) = in_flight.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Send task failed unexpectedly.");
                }
            }
        }
    }

    debug!("Batch channel closed. Send loop stopped.");
}
