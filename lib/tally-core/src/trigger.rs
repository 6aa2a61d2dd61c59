//! Flush scheduling.

use std::time::Duration;

use tally_common::time::MAX_CONFIGURED_DURATION;
use tokio::{
    select,
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::trace;

use crate::buffer::SampleBuffer;

/// State of a [`FlushTrigger`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TriggerState {
    /// Not yet armed.
    Idle,

    /// Timer running.
    Armed,

    /// A flush was signalled and the trigger re-arms on the next wait.
    Fired,

    /// Stopped. No further flushes are signalled.
    Terminated,
}

/// Why a flush was signalled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushReason {
    /// The buffer reached the batch size.
    Threshold,

    /// The batch delay elapsed with samples buffered.
    Timer,

    /// The reporter is stopping with samples buffered.
    Final,
}

impl FlushReason {
    /// Returns the name of this reason, for logging.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::Timer => "timer",
            Self::Final => "final",
        }
    }
}

/// Producer side of a [`FlushTrigger`].
///
/// Producers report the buffer size after each append. Reaching the batch size sends a signal over a channel with room
/// for one pending signal, so any number of concurrent threshold crossings collapse into a single flush.
#[derive(Clone, Debug)]
pub struct ThresholdNotifier {
    batch_size: usize,
    signal_tx: mpsc::Sender<()>,
}

impl ThresholdNotifier {
    /// Observes the buffer size after an append.
    pub fn observe(&self, buffered: usize) {
        if buffered >= self.batch_size {
            // Full means a flush is already pending.
            let _ = self.signal_tx.try_send(());
        }
    }
}

/// Decides when the buffer must be drained.
///
/// A flush is signalled when the buffer reaches the batch size, or when the batch delay elapses with samples buffered.
/// The timer is re-armed after every flush and after every expiry on an empty buffer, so empty batches are never
/// signalled.
#[derive(Debug)]
pub struct FlushTrigger {
    batch_size: usize,
    batch_delay: Duration,
    state: TriggerState,
    deadline: Instant,
    signal_rx: mpsc::Receiver<()>,
}

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + MAX_CONFIGURED_DURATION)
}

impl FlushTrigger {
    /// Creates a new `FlushTrigger` and the notifier producers use to report the buffer size.
    pub fn new(batch_size: usize, batch_delay: Duration) -> (Self, ThresholdNotifier) {
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let trigger = Self {
            batch_size,
            batch_delay,
            state: TriggerState::Idle,
            deadline: deadline_after(batch_delay),
            signal_rx,
        };
        let notifier = ThresholdNotifier { batch_size, signal_tx };

        (trigger, notifier)
    }

    /// Returns the current state.
    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Starts the timer.
    pub fn arm(&mut self) {
        if self.state != TriggerState::Terminated {
            self.deadline = deadline_after(self.batch_delay);
            self.state = TriggerState::Armed;
        }
    }

    /// Waits until the buffer should be flushed.
    ///
    /// Returns `None` once the trigger has been terminated. Cancel-safe: dropping the future loses no signal.
    pub async fn next_flush(&mut self, buffer: &SampleBuffer) -> Option<FlushReason> {
        match self.state {
            TriggerState::Terminated => return None,
            TriggerState::Idle | TriggerState::Fired => self.arm(),
            TriggerState::Armed => {}
        }

        loop {
            select! {
                biased;

                Some(()) = self.signal_rx.recv() => {
                    // Signals sent before the last drain are stale.
                    if buffer.len() >= self.batch_size {
                        self.state = TriggerState::Fired;
                        return Some(FlushReason::Threshold);
                    }
                    trace!("Ignoring stale threshold signal.");
                }
                _ = sleep_until(self.deadline) => {
                    if buffer.is_empty() {
                        trace!("Batch delay elapsed with an empty buffer. Re-arming.");
                        self.arm();
                    } else {
                        self.state = TriggerState::Fired;
                        return Some(FlushReason::Timer);
                    }
                }
            }
        }
    }

    /// Terminates the trigger.
    ///
    /// Returns [`FlushReason::Final`] if the buffer still holds samples, which must then be flushed one last time.
    pub fn terminate(&mut self, buffer: &SampleBuffer) -> Option<FlushReason> {
        if self.state == TriggerState::Terminated {
            return None;
        }

        self.state = TriggerState::Terminated;
        self.signal_rx.close();

        (!buffer.is_empty()).then_some(FlushReason::Final)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{advance, timeout};

    use super::*;
    use crate::{
        buffer::OverflowPolicy,
        sample::{Labels, MetricCategory, Sample, SampleKind},
    };

    fn sample() -> Sample {
        Sample::new("m", MetricCategory::Custom, Labels::new(), 1.0, SampleKind::Counter)
    }

    fn append(buffer: &SampleBuffer, notifier: &ThresholdNotifier) {
        let len = buffer.try_append(sample()).unwrap();
        notifier.observe(len);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_delay_does_not_overflow() {
        let buffer = SampleBuffer::new(16, OverflowPolicy::DropNewest);
        let (mut trigger, notifier) = FlushTrigger::new(1, Duration::MAX);
        trigger.arm();

        append(&buffer, &notifier);
        assert_eq!(trigger.next_flush(&buffer).await, Some(FlushReason::Threshold));
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_fires_before_delay() {
        let buffer = SampleBuffer::new(16, OverflowPolicy::DropNewest);
        let (mut trigger, notifier) = FlushTrigger::new(2, Duration::from_secs(60));
        assert_eq!(trigger.state(), TriggerState::Idle);

        let start = Instant::now();
        append(&buffer, &notifier);
        append(&buffer, &notifier);

        assert_eq!(trigger.next_flush(&buffer).await, Some(FlushReason::Threshold));
        assert_eq!(trigger.state(), TriggerState::Fired);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_never_fires_on_empty_buffer() {
        let buffer = SampleBuffer::new(16, OverflowPolicy::DropNewest);
        let (mut trigger, _notifier) = FlushTrigger::new(50, Duration::from_secs(1));
        trigger.arm();

        let result = timeout(Duration::from_secs(30), trigger.next_flush(&buffer)).await;
        assert!(result.is_err());
        assert_eq!(trigger.state(), TriggerState::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_with_samples_buffered() {
        let buffer = SampleBuffer::new(16, OverflowPolicy::DropNewest);
        let (mut trigger, notifier) = FlushTrigger::new(50, Duration::from_secs(5));
        trigger.arm();

        advance(Duration::from_secs(2)).await;
        append(&buffer, &notifier);

        let start = Instant::now();
        assert_eq!(trigger.next_flush(&buffer).await, Some(FlushReason::Timer));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_signals_collapse_and_stale_ones_are_ignored() {
        let buffer = SampleBuffer::new(16, OverflowPolicy::DropNewest);
        let (mut trigger, notifier) = FlushTrigger::new(2, Duration::from_secs(10));

        // Crossing the threshold repeatedly only leaves a single pending signal.
        for _ in 0..4 {
            append(&buffer, &notifier);
        }
        assert_eq!(trigger.next_flush(&buffer).await, Some(FlushReason::Threshold));
        assert_eq!(buffer.drain().len(), 4);

        // The collapsed signal is gone, so the next flush comes from the timer.
        append(&buffer, &notifier);
        let start = Instant::now();
        assert_eq!(trigger.next_flush(&buffer).await, Some(FlushReason::Timer));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_reset_rearms_the_timer() {
        let buffer = SampleBuffer::new(16, OverflowPolicy::DropNewest);
        let (mut trigger, notifier) = FlushTrigger::new(2, Duration::from_secs(5));
        trigger.arm();

        advance(Duration::from_secs(4)).await;
        append(&buffer, &notifier);
        append(&buffer, &notifier);
        assert_eq!(trigger.next_flush(&buffer).await, Some(FlushReason::Threshold));
        buffer.drain();

        // The original deadline would have been one second from now.
        append(&buffer, &notifier);
        let start = Instant::now();
        assert_eq!(trigger.next_flush(&buffer).await, Some(FlushReason::Timer));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn terminate_requests_final_flush_only_when_non_empty() {
        let buffer = SampleBuffer::new(16, OverflowPolicy::DropNewest);
        let (mut trigger, notifier) = FlushTrigger::new(10, Duration::from_secs(1));
        assert_eq!(trigger.terminate(&buffer), None);
        assert_eq!(trigger.next_flush(&buffer).await, None);

        let (mut trigger, _) = FlushTrigger::new(10, Duration::from_secs(1));
        append(&buffer, &notifier);
        assert_eq!(trigger.terminate(&buffer), Some(FlushReason::Final));
        assert_eq!(trigger.terminate(&buffer), None);
        assert_eq!(trigger.state(), TriggerState::Terminated);
    }
}
