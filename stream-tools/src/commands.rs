//! Operations behind each subcommand, written against `dyn Broker` so they
//! run the same on any backend.

use std::future::Future;
use std::io::Write;

use model_server::{handler_fn, Broker, Config, Error, PredictorRegistry, ProvisionReport, Result};
use serde_json::Value;
use stream_serve_common::topics_for;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Input and output topics of every configured model, in configuration order.
pub fn model_topics(config: &Config, registry: &PredictorRegistry) -> Result<Vec<String>> {
    let mut topics = Vec::with_capacity(config.options.models.len() * 2);
    for model in &config.options.models {
        let identity = registry.load(model)?.identity();
        let (inputs, outputs) = topics_for(&identity);
        topics.push(inputs);
        topics.push(outputs);
    }
    Ok(topics)
}

/// Print a provisioning report, one line per topic.
pub fn print_report(action: &str, report: &ProvisionReport) {
    for topic in &report.applied {
        println!("{} {}", action, topic);
    }
    for topic in &report.conflicts {
        println!("skipped {}", topic);
    }
}

/// Push every JSON line read from `reader` to `topic`. Blank lines are
/// ignored and lines that are not valid JSON are logged and skipped.
///
/// Returns the number of messages pushed.
pub async fn push_lines<R>(broker: &mut dyn Broker, topic: &str, reader: R) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    broker.start_producer(topic).await?;

    let mut lines = reader.lines();
    let mut line_number = 0;
    let mut pushed = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::Backend(format!("Cannot read input: {}", e)))?
    {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(line = line_number, "Skipping invalid JSON: {}", e);
                continue;
            }
        };

        broker.push(&message, topic).await?;
        pushed += 1;
        tracing::debug!(topic, pushed, "Message pushed");
    }

    broker.stop().await;
    Ok(pushed)
}

/// Write every message consumed from `topic` to `out`, one per line, until
/// `shutdown` resolves. The broker is stopped either way.
pub async fn pull_to<W, S>(
    broker: &mut dyn Broker,
    topic: &str,
    out: &mut W,
    shutdown: S,
) -> Result<()>
where
    W: Write + Send,
    S: Future<Output = ()>,
{
    broker.start_consumer(topic).await?;
    tracing::info!(topic, "Pulling messages, press Ctrl-C to stop");

    let mut handler = handler_fn(|payload: Vec<u8>| {
        let written = writeln!(out, "{}", String::from_utf8_lossy(&payload))
            .and_then(|_| out.flush())
            .map_err(|e| Error::Backend(format!("Cannot write message: {}", e)));
        async move { written }
    });

    let result = tokio::select! {
        result = broker.pull(&mut handler) => result,
        _ = shutdown => Ok(()),
    };

    broker.stop().await;
    result
}
