use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tally_core::{Batch, EncodeError, Sink, TransportError};
use tracing::info;

use crate::encoders::JsonEncoder;

/// Log sink configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LogSinkConfiguration {}

impl LogSinkConfiguration {
    /// Builds the sink.
    pub fn build(&self) -> LogSink {
        LogSink
    }
}

/// Log sink.
///
/// Emits every payload as an `info` event. Handy for trying out a configuration from the command line.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn encode(&self, batch: &Batch) -> Result<Bytes, EncodeError> {
        JsonEncoder.encode(batch)
    }

    async fn transmit(&self, payload: Bytes) -> Result<(), TransportError> {
        info!(bytes = payload.len(), payload = %String::from_utf8_lossy(&payload), "Batch.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tally_core::{labels, MetricCategory, Sample, SampleKind};

    use super::*;

    #[tokio::test]
    async fn encodes_json_and_always_accepts() {
        let batch = Batch::new(
            1,
            vec![Sample::new(
                "bus.messages",
                MetricCategory::EventBus,
                labels([("address", "orders")]),
                4.0,
                SampleKind::Counter,
            )],
        );

        let payload = LogSink.encode(&batch).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["samples"][0]["category"], "EVENT_BUS");

        LogSink.transmit(payload).await.unwrap();
    }
}
