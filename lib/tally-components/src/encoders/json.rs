use bytes::Bytes;
use serde::Serialize;
use tally_core::{Batch, EncodeError, SampleRecord};

#[derive(Serialize)]
struct Payload {
    sequence: u64,
    samples: Vec<SampleRecord>,
}

/// Encodes batches as a JSON document.
///
/// The document is an object with the batch sequence number and the samples, in order:
///
/// ```json
/// {"sequence":1,"samples":[{"name":"http.requests","category":"HTTP_SERVER","labels":{"method":"GET"},"value":1.0,"kind":"counter","timestamp_ms":1700000000000}]}
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoder;

impl JsonEncoder {
    /// Encodes a batch.
    ///
    /// # Errors
    ///
    /// If the batch cannot be serialized, an error is returned.
    pub fn encode(&self, batch: &Batch) -> Result<Bytes, EncodeError> {
        let payload = Payload {
            sequence: batch.sequence(),
            samples: batch.samples().iter().map(SampleRecord::from).collect(),
        };

        serde_json::to_vec(&payload)
            .map(Bytes::from)
            .map_err(|source| EncodeError::Serialize { source })
    }
}
