//! Bounded sample buffer.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering::Relaxed},
        Mutex, MutexGuard,
    },
};

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tokio::sync::Notify;

use crate::sample::Sample;

/// What happens when a sample is appended to a full buffer.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The incoming sample is dropped and counted.
    #[default]
    DropNewest,

    /// Asynchronous appends wait until a drain frees capacity.
    ///
    /// Synchronous appends still drop.
    Block,
}

/// The buffer was at capacity and the sample was dropped.
#[derive(Debug, Snafu)]
#[snafu(display("Sample buffer is full ({} samples); sample dropped.", capacity))]
pub struct BufferFull {
    /// Capacity of the buffer.
    pub capacity: usize,
}

/// A bounded, thread-safe buffer of samples awaiting flush.
///
/// Appends and drains serialize on a single lock, so a sample appended concurrently with a drain ends up either in the
/// drained batch or in the buffer afterwards, never both and never neither.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Mutex<Vec<Sample>>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
    closed: AtomicBool,
    space_available: Notify,
}

impl SampleBuffer {
    /// Creates a new `SampleBuffer` holding at most `capacity` samples.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            space_available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        // Nothing panics while holding the lock, so a poisoned buffer is still consistent.
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, sample: Sample) -> Result<usize, Sample> {
        let mut samples = self.lock();
        if samples.len() >= self.capacity || self.closed.load(Relaxed) {
            return Err(sample);
        }
        samples.push(sample);
        Ok(samples.len())
    }

    /// Appends a sample without waiting, returning the buffer size after the append.
    ///
    /// # Errors
    ///
    /// If the buffer is full, or closed, the sample is dropped, the dropped-sample counter is incremented, and an error
    /// is returned.
    pub fn try_append(&self, sample: Sample) -> Result<usize, BufferFull> {
        self.push(sample).map_err(|_| {
            self.dropped.fetch_add(1, Relaxed);
            BufferFull {
                capacity: self.capacity,
            }
        })
    }

    /// Appends a sample, honoring the overflow policy, returning the buffer size after the append.
    ///
    /// With [`OverflowPolicy::Block`], waits for a drain to free capacity. A closed buffer never waits.
    ///
    /// # Errors
    ///
    /// If the sample was dropped, an error is returned.
    pub async fn append(&self, mut sample: Sample) -> Result<usize, BufferFull> {
        if self.policy == OverflowPolicy::DropNewest {
            return self.try_append(sample);
        }

        loop {
            // Register for wakeups before checking capacity, so a drain in between isn't missed.
            let notified = self.space_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Relaxed) {
                return self.try_append(sample);
            }

            match self.push(sample) {
                Ok(len) => return Ok(len),
                Err(rejected) => {
                    sample = rejected;
                    notified.await;
                }
            }
        }
    }

    /// Takes every buffered sample, leaving the buffer empty.
    pub fn drain(&self) -> Vec<Sample> {
        let drained = mem::take(&mut *self.lock());
        if !drained.is_empty() {
            self.space_available.notify_waiters();
        }
        drained
    }

    /// Closes the buffer.
    ///
    /// Subsequent appends are dropped, and any blocked appends are woken up to be dropped.
    pub fn close(&self) {
        // Taken under the lock so no append slips in after the final drain.
        let _guard = self.lock();
        self.closed.store(true, Relaxed);
        self.space_available.notify_waiters();
    }

    /// Returns the number of buffered samples.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if there are no buffered samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of samples the buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of samples dropped because the buffer was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc, thread};

    use proptest::prelude::*;

    use super::*;
    use crate::sample::{Labels, MetricCategory, SampleKind};

    fn sample(id: u64) -> Sample {
        Sample::with_timestamp(
            "id",
            MetricCategory::Custom,
            Labels::new(),
            id as f64,
            SampleKind::Gauge,
            id,
        )
    }

    #[test]
    fn drop_newest_when_full() {
        let buffer = SampleBuffer::new(2, OverflowPolicy::DropNewest);

        assert_eq!(buffer.try_append(sample(1)).unwrap(), 1);
        assert_eq!(buffer.try_append(sample(2)).unwrap(), 2);
        let err = buffer.try_append(sample(3)).unwrap_err();
        assert_eq!(err.capacity, 2);
        assert_eq!(buffer.dropped(), 1);

        let drained = buffer.drain();
        assert_eq!(drained.iter().map(Sample::timestamp_ms).collect::<Vec<_>>(), vec![1, 2]);
        assert!(buffer.is_empty());

        // Draining makes room again.
        assert_eq!(buffer.try_append(sample(4)).unwrap(), 1);
    }

    #[test]
    fn closed_buffer_drops() {
        let buffer = SampleBuffer::new(8, OverflowPolicy::DropNewest);
        buffer.close();
        assert!(buffer.try_append(sample(1)).is_err());
        assert_eq!(buffer.dropped(), 1);
    }

    #[tokio::test]
    async fn block_policy_waits_for_drain() {
        let buffer = Arc::new(SampleBuffer::new(1, OverflowPolicy::Block));
        buffer.append(sample(1)).await.unwrap();

        let blocked = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.append(sample(2)).await })
        };

        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        let first = buffer.drain();
        assert_eq!(first.len(), 1);

        assert_eq!(blocked.await.unwrap().unwrap(), 1);
        assert_eq!(buffer.drain()[0].timestamp_ms(), 2);
        assert_eq!(buffer.dropped(), 0);
    }

    #[tokio::test]
    async fn block_policy_released_by_close() {
        let buffer = Arc::new(SampleBuffer::new(1, OverflowPolicy::Block));
        buffer.append(sample(1)).await.unwrap();

        let blocked = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.append(sample(2)).await })
        };
        tokio::task::yield_now().await;

        buffer.close();
        assert!(blocked.await.unwrap().is_err());
        assert_eq!(buffer.dropped(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn property_test_drain_never_loses_or_duplicates(
            producers in 1usize..4,
            per_producer in 1u64..200,
            drains in 1usize..4,
        ) {
            let buffer = Arc::new(SampleBuffer::new(usize::MAX, OverflowPolicy::DropNewest));

            let handles = (0..producers as u64)
                .map(|p| {
                    let buffer = Arc::clone(&buffer);
                    thread::spawn(move || {
                        for i in 0..per_producer {
                            buffer.try_append(sample(p * 1_000 + i)).unwrap();
                        }
                    })
                })
                .collect::<Vec<_>>();

            let mut seen = Vec::new();
            for _ in 0..drains {
                seen.extend(buffer.drain());
                thread::yield_now();
            }
            for handle in handles {
                handle.join().unwrap();
            }
            seen.extend(buffer.drain());

            let ids = seen.iter().map(Sample::timestamp_ms).collect::<Vec<_>>();
            let unique = ids.iter().copied().collect::<BTreeSet<_>>();
            prop_assert_eq!(ids.len(), unique.len());
            prop_assert_eq!(unique.len() as u64, producers as u64 * per_producer);

            // Per-producer append order survives across drains.
            for p in 0..producers as u64 {
                let mine = ids.iter().copied().filter(|id| id / 1_000 == p).collect::<Vec<_>>();
                prop_assert!(mine.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
