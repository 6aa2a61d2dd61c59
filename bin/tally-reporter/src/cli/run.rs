use std::sync::Arc;

use tally_components::sinks::{PullSink, SinkConfiguration};
use tally_config::GenericConfiguration;
use tally_core::{Registry, RegistryCoordinator, Reporter, ReporterConfiguration, Sample, SampleRecord, Sink};
use tally_error::{ErrorContext as _, GenericError};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader},
    select,
    signal::ctrl_c,
};
use tracing::{info, warn};

/// Outcome of reading samples from an input stream.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct IngestSummary {
    /// Lines parsed and recorded.
    pub accepted: u64,

    /// Lines that weren't valid samples.
    pub invalid: u64,
}

/// Reads samples, one JSON object per line, and records each of them to `registry`.
///
/// Blank lines are skipped. Lines that fail to parse are counted and logged, but don't stop ingestion.
pub async fn ingest_lines<R>(reader: R, registry: Option<&Registry>) -> Result<IngestSummary, GenericError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await.error_context("Failed to read input.")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<SampleRecord>(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Skipping invalid sample.");
                summary.invalid += 1;
                continue;
            }
        };

        if let Some(registry) = registry {
            registry.submit(&Sample::from(record)).await;
        }
        summary.accepted += 1;
    }

    Ok(summary)
}

/// Writes each payload on its own line.
///
/// Returns the number of payloads written.
pub async fn write_payloads<W, I>(writer: &mut W, payloads: I) -> Result<usize, GenericError>
where
    W: AsyncWrite + Unpin,
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut written = 0;
    for payload in payloads {
        writer
            .write_all(payload.as_ref())
            .await
            .error_context("Failed to write payload.")?;
        writer.write_all(b"\n").await.error_context("Failed to write payload.")?;
        written += 1;
    }
    writer.flush().await.error_context("Failed to write payload.")?;

    Ok(written)
}

/// Handles the `run` subcommand.
pub async fn handle_run_command(config: &GenericConfiguration) -> Result<(), GenericError> {
    let reporter_config =
        ReporterConfiguration::from_configuration(config).error_context("Failed to load reporter configuration.")?;
    let sink_config = SinkConfiguration::from_configuration(config).error_context("Failed to load sink configuration.")?;

    // The pull sink is kept by its concrete type so it can be scraped to standard output at exit.
    let (sink, pull_sink): (Arc<dyn Sink>, Option<Arc<PullSink>>) = match &sink_config {
        SinkConfiguration::Pull(pull_config) => {
            let pull_sink = Arc::new(pull_config.build().error_context("Invalid sink configuration.")?);
            (Arc::clone(&pull_sink) as Arc<dyn Sink>, Some(pull_sink))
        }
        other => (other.build().error_context("Invalid sink configuration.")?, None),
    };

    let coordinator = RegistryCoordinator::new();
    let reporter =
        Reporter::start(&reporter_config, sink, &coordinator).error_context("Failed to start reporter.")?;
    if !reporter.is_running() {
        warn!("Reporter is disabled. Samples will be read but discarded.");
    }

    info!(registry = reporter_config.registry_name(), "Reading samples from standard input...");

    let registry = reporter.registry().cloned();
    let stdin = BufReader::new(tokio::io::stdin());
    select! {
        result = ingest_lines(stdin, registry.as_deref()) => {
            let summary = result?;
            info!(accepted = summary.accepted, invalid = summary.invalid, "Reached end of input.");
        },
        _ = ctrl_c() => info!("Interrupted. Stopping reporter..."),
    }
    drop(registry);

    let stats = reporter.stop().await.error_context("Failed to stop reporter cleanly.")?;

    if let Some(pull_sink) = pull_sink {
        let written = write_payloads(&mut tokio::io::stdout(), pull_sink.scrape()).await?;
        info!(payloads = written, "Wrote scraped payloads.");
    }

    let rendered = serde_json::to_string_pretty(&stats).error_context("Failed to render reporter counters.")?;
    println!("{}", rendered);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tally_core::{MetricCategory, SampleKind};

    use super::*;

    #[tokio::test]
    async fn ingests_valid_lines_and_skips_the_rest() {
        let input = concat!(
            r#"{"name":"http.requests","category":"HTTP_SERVER","labels":{"method":"GET"},"value":1,"kind":"counter"}"#,
            "\n\n",
            "not json\n",
            r#"{"name":"pool.in_use","value":2.5}"#,
            "\n",
            r#"{"name":"missing.value"}"#,
            "\n",
        );

        let config = ReporterConfiguration {
            enabled: true,
            batch_size: 10,
            ..Default::default()
        };
        let pull_sink = Arc::new(PullSink::new(Duration::from_secs(60)));
        let coordinator = RegistryCoordinator::new();
        let reporter = Reporter::start(&config, Arc::clone(&pull_sink) as Arc<dyn Sink>, &coordinator).unwrap();

        let summary = ingest_lines(input.as_bytes(), reporter.registry().map(|r| r.as_ref()))
            .await
            .unwrap();
        assert_eq!(summary, IngestSummary { accepted: 2, invalid: 2 });

        let stats = reporter.stop().await.unwrap();
        assert_eq!(stats.batches_sent, 1);

        let payloads = pull_sink.scrape();
        assert_eq!(payloads.len(), 1);
        let payload: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
        let samples = payload["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0]["category"], MetricCategory::HttpServer.as_str());
        assert_eq!(samples[1]["category"], "CUSTOM");
        assert_eq!(samples[1]["kind"], serde_json::to_value(SampleKind::Gauge).unwrap());
    }

    #[tokio::test]
    async fn scraped_payloads_written_one_per_line() {
        let pull_sink = PullSink::new(Duration::from_secs(60));
        pull_sink.transmit(r#"{"sequence":1}"#.into()).await.unwrap();
        pull_sink.transmit(r#"{"sequence":2}"#.into()).await.unwrap();

        let mut output = Vec::new();
        let written = write_payloads(&mut output, pull_sink.scrape()).await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(String::from_utf8(output).unwrap(), "{\"sequence\":1}\n{\"sequence\":2}\n");
        assert!(pull_sink.scrape().is_empty());
    }

    #[tokio::test]
    async fn ingest_without_a_registry_still_counts() {
        let summary = ingest_lines(&b"{\"name\":\"a\",\"value\":1}\n"[..], None).await.unwrap();
        assert_eq!(summary, IngestSummary { accepted: 1, invalid: 0 });
    }
}
