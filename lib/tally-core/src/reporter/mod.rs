//! The reporter.

use std::{sync::Arc, time::Duration};

use tally_common::{
    task::spawn_traced_named,
    time::get_unix_timestamp_millis,
};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info};

use crate::{
    buffer::SampleBuffer,
    config::ReporterConfiguration,
    error::ReporterError,
    filter::CategoryFilter,
    matcher::LabelMatcher,
    registry::{Registry, RegistryCoordinator, RegistryHandle},
    sample::{Labels, MetricCategory, Sample, SampleKind},
    sink::{Batch, Sink},
    trigger::{FlushReason, FlushTrigger},
};

mod ingest;
pub(crate) use self::ingest::Ingest;

mod send;
use self::send::{run_send_loop, BatchSender};

mod stats;
pub(crate) use self::stats::Counters;
pub use self::stats::{ReporterStats, StatsHandle};

// Batches queued between the flush task and the send task. A slow sink backs up into the flush task, and from there
// into the bounded sample buffer.
const BATCH_CHANNEL_CAPACITY: usize = 8;

struct Running {
    ingest: Arc<Ingest>,
    registry: RegistryHandle,
    coordinator: RegistryCoordinator,
    shutdown_tx: oneshot::Sender<()>,
    flush_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

impl Running {
    fn detach(&self) {
        self.registry.detach(&self.ingest);
    }
}

/// Buffers samples and delivers them to a sink in batches.
///
/// A started reporter runs two background tasks: a flush task that owns the [`FlushTrigger`] and drains the buffer into
/// sequenced batches, and a send task that transmits them with retries. Producers never wait on either of them.
///
/// Stopping the reporter with [`stop`][Self::stop] performs a final flush. Dropping it without stopping detaches it
/// from its registry and lets the final flush run in the background.
pub struct Reporter {
    stats: StatsHandle,
    shutdown_timeout: Duration,
    running: Option<Running>,
}

impl Reporter {
    /// Validates the configuration and starts a reporter that delivers to `sink`.
    ///
    /// The reporter attaches to the registry named in the configuration, creating it if needed. If the configuration
    /// has the reporter disabled, an inert reporter is returned that discards every sample and holds no registry.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or a match rule fails to compile, an error is returned.
    pub fn start(
        config: &ReporterConfiguration, sink: Arc<dyn Sink>, coordinator: &RegistryCoordinator,
    ) -> Result<Self, ReporterError> {
        config.validate()?;

        let matcher = LabelMatcher::new(&config.label_matches)?
            .with_excluded_labels(config.excluded_labels.iter().cloned())
            .with_strict(config.strict_label_matching);

        let counters = Arc::new(Counters::new(config.registry_name()));
        let stats = StatsHandle::new(Arc::clone(&counters));

        if !config.enabled {
            debug!("Reporter disabled. Samples will be discarded.");
            return Ok(Self {
                stats,
                shutdown_timeout: config.shutdown_timeout(),
                running: None,
            });
        }

        let buffer = Arc::new(SampleBuffer::new(config.buffer_capacity, config.overflow_policy));
        let (mut trigger, notifier) = FlushTrigger::new(config.batch_size, config.batch_delay());
        trigger.arm();

        let ingest = Arc::new(Ingest::new(
            CategoryFilter::new(config.disabled_metrics_categories.iter().copied()),
            matcher,
            config.prefix.clone(),
            Arc::clone(&buffer),
            notifier,
            Arc::clone(&counters),
        ));

        let registry = coordinator.get_or_create(config.registry_name.as_deref());
        registry.attach(Arc::clone(&ingest));

        let (batches_tx, batches_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let sender = BatchSender::new(sink, config.retry.to_policy(), Arc::clone(&counters));
        let send_task = spawn_traced_named(
            format!("reporter-send-{}", registry.name()),
            run_send_loop(batches_rx, sender, config.delivery, config.max_in_flight),
        );

        let flusher = Flusher {
            buffer,
            batch_size: config.batch_size,
            next_sequence: 1,
            batches_tx,
            counters,
        };
        let flush_task = spawn_traced_named(
            format!("reporter-flush-{}", registry.name()),
            run_flush_loop(trigger, flusher, shutdown_rx),
        );

        info!(
            registry = registry.name(),
            batch_size = config.batch_size,
            batch_delay = ?config.batch_delay(),
            delivery = ?config.delivery,
            "Reporter started."
        );

        Ok(Self {
            stats,
            shutdown_timeout: config.shutdown_timeout(),
            running: Some(Running {
                ingest,
                registry,
                coordinator: coordinator.clone(),
                shutdown_tx,
                flush_task,
                send_task,
            }),
        })
    }

    /// Returns `true` if the reporter is running.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Returns the registry the reporter is attached to, if it is running.
    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.running.as_ref().map(|running| running.registry.registry())
    }

    /// Records a sample to this reporter alone.
    ///
    /// Never waits for buffer capacity, whatever the overflow policy.
    pub fn record<N>(&self, name: N, category: MetricCategory, labels: Labels, value: f64, kind: SampleKind)
    where
        N: Into<Arc<str>>,
    {
        if self.running.is_some() {
            self.record_sample(&Sample::new(name, category, labels, value, kind));
        }
    }

    /// Records an existing sample to this reporter alone, without waiting.
    pub fn record_sample(&self, sample: &Sample) {
        if let Some(running) = &self.running {
            running.ingest.record(sample);
        }
    }

    /// Records a sample to this reporter alone, honoring the overflow policy.
    ///
    /// With the `block` overflow policy, waits until the buffer has room.
    pub async fn submit(&self, sample: &Sample) {
        if let Some(running) = &self.running {
            running.ingest.submit(sample).await;
        }
    }

    /// Returns the current counters.
    pub fn stats(&self) -> ReporterStats {
        self.stats.snapshot()
    }

    /// Returns a handle to the counters that remains usable after the reporter is stopped.
    pub fn stats_handle(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Stops the reporter.
    ///
    /// The reporter is detached from its registry, the trigger stops arming, and buffered samples are flushed one last
    /// time. Returns once every queued batch was sent or dropped, or once the shutdown timeout elapses, whichever comes
    /// first.
    ///
    /// # Errors
    ///
    /// If the shutdown timeout elapses first, the background tasks are aborted and an error is returned. Pending
    /// batches are lost.
    pub async fn stop(mut self) -> Result<ReporterStats, ReporterError> {
        let Some(running) = self.running.take() else {
            return Ok(self.stats());
        };

        running.detach();
        let Running {
            registry,
            coordinator,
            shutdown_tx,
            mut flush_task,
            mut send_task,
            ..
        } = running;
        coordinator.release(registry);

        let _ = shutdown_tx.send(());

        let drained = timeout(self.shutdown_timeout, async {
            if let Err(e) = (&mut flush_task).await {
                error!(error = %e, "Flush task failed unexpectedly.");
            }
            if let Err(e) = (&mut send_task).await {
                error!(error = %e, "Send task failed unexpectedly.");
            }
        })
        .await;

        match drained {
            Ok(()) => {
                debug!("Reporter stopped.");
                Ok(self.stats())
            }
            Err(_) => {
                flush_task.abort();
                send_task.abort();
                error!(timeout = ?self.shutdown_timeout, "Reporter did not stop in time. Pending batches were abandoned.");
                Err(ReporterError::ShutdownTimeout {
                    timeout: self.shutdown_timeout,
                })
            }
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            // Dropping the shutdown sender lets the flush task finish on its own.
            running.detach();
            running.coordinator.release(running.registry);
        }
    }
}

struct Flusher {
    buffer: Arc<SampleBuffer>,
    batch_size: usize,
    next_sequence: u64,
    batches_tx: mpsc::Sender<Batch>,
    counters: Arc<Counters>,
}

impl Flusher {
    async fn flush(&mut self, reason: FlushReason) {
        let mut pending = self.buffer.drain();
        if pending.is_empty() {
            return;
        }

        self.counters.flushed_at(get_unix_timestamp_millis());
        debug!(reason = reason.as_str(), samples = pending.len(), "Flushing buffer.");

        // Producers can outrun the flush task, so a single drain may hold several batches worth of samples.
        while !pending.is_empty() {
            let rest = pending.split_off(pending.len().min(self.batch_size));
            let batch = Batch::new(self.next_sequence, pending);
            self.next_sequence += 1;
            pending = rest;

            if let Err(e) = self.batches_tx.send(batch).await {
                error!(sequence = e.0.sequence(), "Send task stopped. Dropping batch.");
                self.counters.batch_failed();
            }
        }
    }
}

async fn run_flush_loop(mut trigger: FlushTrigger, mut flusher: Flusher, mut shutdown_rx: oneshot::Receiver<()>) {
    loop {
        select! {
            _ = &mut shutdown_rx => break,
            maybe_reason = trigger.next_flush(&flusher.buffer) => match maybe_reason {
                Some(reason) => flusher.flush(reason).await,
                None => break,
            },
        }
    }

    // Nothing can be appended once closed, so the final drain sees every accepted sample.
    flusher.buffer.close();
    if let Some(reason) = trigger.terminate(&flusher.buffer) {
        flusher.flush(reason).await;
    }

    debug!("Flush loop stopped.");
}
