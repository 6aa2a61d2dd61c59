//! Batches and the sink interface.

use std::{io, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Snafu;
use tally_error::GenericError;

use crate::sample::Sample;

/// An ordered group of samples flushed together.
///
/// Sequence numbers start at 1 and increase by one for every batch a reporter flushes.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    sequence: u64,
    samples: Vec<Sample>,
}

impl Batch {
    /// Creates a new `Batch`.
    pub fn new(sequence: u64, samples: Vec<Sample>) -> Self {
        Self { sequence, samples }
    }

    /// Returns the sequence number of the batch.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the samples in the batch, in append order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Returns the number of samples in the batch.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if the batch has no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A batch could not be encoded.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum EncodeError {
    /// Serializing the samples failed.
    #[snafu(display("Failed to serialize batch."))]
    Serialize {
        /// Error source.
        source: serde_json::Error,
    },

    /// Compressing the serialized payload failed.
    #[snafu(display("Failed to compress payload."))]
    Compress {
        /// Error source.
        source: io::Error,
    },
}

/// A payload could not be transmitted.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum TransportError {
    /// The request could not be completed.
    #[snafu(display("Transport I/O error."))]
    Io {
        /// Error source.
        source: GenericError,
    },

    /// The backend answered with a non-success status.
    #[snafu(display("Backend responded with status {}: {}", status, body))]
    Status {
        /// HTTP status code.
        status: u16,

        /// Response body, possibly truncated.
        body: String,
    },

    /// The request did not complete in time.
    #[snafu(display("Request timed out after {:?}.", elapsed))]
    Timeout {
        /// How long the request ran before timing out.
        elapsed: Duration,
    },

    /// The sink refused the payload outright.
    #[snafu(display("Payload rejected: {}", reason))]
    Rejected {
        /// Why the payload was rejected.
        reason: String,
    },
}

impl TransportError {
    /// Returns `true` if the failure points at the payload rather than the backend.
    ///
    /// Covers client errors other than 408 (request timeout) and 429 (too many requests), and outright rejections.
    /// These are still retried unless `retry.drop_client_errors` is set.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Timeout { .. } => false,
            Self::Status { status, .. } => (400..500).contains(status) && *status != 408 && *status != 429,
            Self::Rejected { .. } => true,
        }
    }
}

/// A batch was dropped.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum DeliveryError {
    /// The batch could not be encoded.
    #[snafu(display("Failed to encode batch {}.", sequence))]
    Encode {
        /// Sequence number of the batch.
        sequence: u64,

        /// Error source.
        source: EncodeError,
    },

    /// Every transmission attempt failed, or a client error was dropped without retrying.
    #[snafu(display("Failed to transmit batch {} after {} attempt(s).", sequence, attempts))]
    Transport {
        /// Sequence number of the batch.
        sequence: u64,

        /// Number of attempts made.
        attempts: u32,

        /// Error from the last attempt.
        source: TransportError,
    },
}

/// A backend that batches are delivered to.
///
/// Encoding, including any compression, happens once per batch; the encoded payload is then handed to `transmit` for
/// the first attempt and for every retry.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name of the sink, for logging.
    fn name(&self) -> &'static str;

    /// Encodes a batch into its wire representation.
    async fn encode(&self, batch: &Batch) -> Result<Bytes, EncodeError>;

    /// Transmits an encoded payload.
    async fn transmit(&self, payload: Bytes) -> Result<(), TransportError>;
}
