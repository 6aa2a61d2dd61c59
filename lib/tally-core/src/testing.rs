//! Test doubles.

use std::sync::{
    atomic::{AtomicU32, Ordering::SeqCst},
    Mutex,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::sink::{Batch, EncodeError, Sink, TransportError};

/// A delivered batch, as seen by [`RecordingSink`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delivered {
    pub sequence: u64,
    pub names: Vec<String>,
}

/// A sink that fails a configurable number of transmissions, then records what it receives.
#[derive(Default)]
pub struct RecordingSink {
    failures_left: AtomicU32,
    status: u16,
    attempts: AtomicU32,
    encoded: Mutex<Vec<Delivered>>,
    delivered: Mutex<Vec<Delivered>>,
    delivered_notify: Notify,
}

impl RecordingSink {
    pub fn failing(failures: u32) -> Self {
        Self::failing_with_status(failures, 503)
    }

    pub fn failing_with_status(failures: u32, status: u16) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            status,
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(SeqCst)
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn encoded(&self) -> Vec<Delivered> {
        self.encoded.lock().unwrap().clone()
    }

    /// Waits until at least `count` batches were delivered.
    pub async fn wait_for(&self, count: usize) -> Vec<Delivered> {
        loop {
            let notified = self.delivered_notify.notified();
            let delivered = self.delivered();
            if delivered.len() >= count {
                return delivered;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn encode(&self, batch: &Batch) -> Result<Bytes, EncodeError> {
        let names = batch.samples().iter().map(|s| s.name().to_string()).collect::<Vec<_>>();
        self.encoded.lock().unwrap().push(Delivered {
            sequence: batch.sequence(),
            names: names.clone(),
        });
        Ok(Bytes::from(format!("{}|{}", batch.sequence(), names.join(","))))
    }

    async fn transmit(&self, payload: Bytes) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, SeqCst);

        let failed = self
            .failures_left
            .fetch_update(SeqCst, SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Status {
                status: self.status,
                body: "unavailable".to_string(),
            });
        }

        let raw = String::from_utf8(payload.to_vec()).unwrap();
        let (sequence, names) = raw.split_once('|').unwrap();
        let names = if names.is_empty() {
            Vec::new()
        } else {
            names.split(',').map(String::from).collect()
        };
        self.delivered.lock().unwrap().push(Delivered {
            sequence: sequence.parse().unwrap(),
            names,
        });
        self.delivered_notify.notify_waiters();
        Ok(())
    }
}
