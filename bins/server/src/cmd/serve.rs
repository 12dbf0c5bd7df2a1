use std::future::Future;
use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;
use delay_api::{Payload, PayloadFormat};
use delay_pipeline::{DelayInput, DelayOutput, PipelineError, ShutdownReport, SinkRegistry};
use sink_elasticsearch::ElasticsearchSinkFactory;
use sink_stdout::StdoutSinkFactory;

/// Lines buffered between the stdin reader thread and the runtime.
const INPUT_BUFFER: usize = 1024;

/// Every output this binary can deliver to.
pub fn sink_registry() -> SinkRegistry {
    let mut registry = SinkRegistry::new();
    registry
        .register("stdout", Arc::new(StdoutSinkFactory))
        .register("elasticsearch", Arc::new(ElasticsearchSinkFactory));
    registry
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("delay-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    let shutdown_timeout = config.shutdown_timeout_duration()?;
    tracing::info!(config = %args.config, "loaded config");

    // --- Resolve sink, fail fast on bad config ---
    let output = DelayOutput::build(&config.delay, &sink_registry())?;

    let token = CancellationToken::new();
    let (input, mut scheduler) = output.spawn(token.clone());

    // --- Feed stdin lines until EOF, Ctrl+C or a dead scheduler ---
    let mut lines = spawn_stdin_reader();
    let mut counts = InputCounts::default();
    let end = feed(
        &mut lines,
        &input,
        config.input.format,
        &mut scheduler,
        tokio::signal::ctrl_c(),
        &mut counts,
    )
    .await?;

    // --- Drain ---
    token.cancel();
    let joined = match end {
        InputEnd::SchedulerExited(joined) => {
            tracing::error!(pending = input.pending(), "scheduler stopped before input ended");
            joined
        }
        InputEnd::Eof | InputEnd::Interrupted => {
            tracing::info!(received = counts.received, rejected = counts.rejected, pending = input.pending(), "draining");
            match tokio::time::timeout(shutdown_timeout, scheduler).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(ServerError::ShutdownTimeout {
                        timeout_secs: shutdown_timeout.as_secs_f64(),
                        pending: input.pending(),
                    });
                }
            }
        }
    };
    let report = joined??;

    tracing::info!(
        received = counts.received,
        rejected = counts.rejected,
        ticks = report.ticks,
        delivered = report.delivered,
        dropped = report.dropped,
        requeued = report.requeued,
        "shutdown complete"
    );
    Ok(())
}

type SchedulerHandle = JoinHandle<Result<ShutdownReport, PipelineError>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct InputCounts {
    received: u64,
    rejected: u64,
}

/// Why the input loop stopped.
#[derive(Debug)]
enum InputEnd {
    Eof,
    Interrupted,
    SchedulerExited(Result<Result<ShutdownReport, PipelineError>, JoinError>),
}

/// Hand lines to `input` until the reader ends, `shutdown` fires or the
/// scheduler task finishes on its own.
async fn feed<S>(
    lines: &mut mpsc::Receiver<std::io::Result<String>>,
    input: &DelayInput,
    format: PayloadFormat,
    scheduler: &mut SchedulerHandle,
    shutdown: S,
    counts: &mut InputCounts,
) -> Result<InputEnd, ServerError>
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            joined = &mut *scheduler => return Ok(InputEnd::SchedulerExited(joined)),
            signal = &mut shutdown => {
                signal?;
                tracing::info!("shutting down...");
                return Ok(InputEnd::Interrupted);
            }
            line = lines.recv() => match line {
                Some(Ok(line)) => match to_payload(line, format) {
                    Some(payload) => {
                        input.receive(payload);
                        counts.received += 1;
                    }
                    None => counts.rejected += 1,
                },
                Some(Err(e)) => {
                    tracing::error!(error = %e, "stdin read failed");
                    return Ok(InputEnd::Eof);
                }
                None => {
                    tracing::info!("input closed");
                    return Ok(InputEnd::Eof);
                }
            },
        }
    }
}

/// Blocking stdin reads run on their own thread so a pending read never
/// holds up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(INPUT_BUFFER);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let stop = line.is_err();
            if tx.blocking_send(line).is_err() || stop {
                break;
            }
        }
    });
    rx
}

/// Blank lines are ignored; with `json` input, lines that do not parse are
/// rejected here so sinks only ever see valid documents.
fn to_payload(line: String, format: PayloadFormat) -> Option<Payload> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }
    if format == PayloadFormat::Json {
        if let Err(e) = serde_json::from_str::<serde_json::Value>(line) {
            tracing::warn!(error = %e, "skipping line that is not valid JSON");
            return None;
        }
    }
    Some(Payload::new(line.as_bytes().to_vec(), format))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::future::pending;

    use delay_pipeline::config::{DelayConfig, DrainPolicy};

    /// A running stdout output that never releases and drops on shutdown,
    /// so nothing is printed.
    fn running_input() -> (DelayInput, SchedulerHandle, CancellationToken) {
        let config = DelayConfig { delay: 600.0, drain: DrainPolicy::Drop, ..DelayConfig::default() };
        let output = DelayOutput::build(&config, &sink_registry()).unwrap();
        let token = CancellationToken::new();
        let (input, handle) = output.spawn(token.clone());
        (input, handle, token)
    }

    #[tokio::test]
    async fn feed_stops_when_scheduler_dies() {
        let (input, _running, token) = running_input();
        let (_tx, mut lines) = mpsc::channel(4);
        let mut failed: SchedulerHandle =
            tokio::spawn(async { Err(PipelineError::InvariantViolation { index: 3 }) });
        let mut counts = InputCounts::default();

        let end = feed(&mut lines, &input, PayloadFormat::Plain, &mut failed, pending(), &mut counts)
            .await
            .unwrap();
        assert!(matches!(
            end,
            InputEnd::SchedulerExited(Ok(Err(PipelineError::InvariantViolation { index: 3 })))
        ));
        token.cancel();
    }

    #[tokio::test]
    async fn feed_counts_lines_until_eof() {
        let (input, mut scheduler, token) = running_input();
        let (tx, mut lines) = mpsc::channel(4);
        tx.send(Ok("one".to_string())).await.unwrap();
        tx.send(Ok("   ".to_string())).await.unwrap();
        tx.send(Ok("two".to_string())).await.unwrap();
        drop(tx);
        let mut counts = InputCounts::default();

        let end = feed(&mut lines, &input, PayloadFormat::Plain, &mut scheduler, pending(), &mut counts)
            .await
            .unwrap();
        assert!(matches!(end, InputEnd::Eof));
        assert_eq!(counts, InputCounts { received: 2, rejected: 1 });
        assert_eq!(input.pending(), 2);

        token.cancel();
        let report = scheduler.await.unwrap().unwrap();
        assert_eq!(report.dropped, 2);
    }

    #[test]
    fn registry_knows_both_outputs() {
        let registry = sink_registry();
        assert_eq!(registry.names(), ["elasticsearch", "stdout"]);
    }

    #[test]
    fn unsupported_output_fails_at_build() {
        let config = DelayConfig { out: "kafka".into(), ..DelayConfig::default() };
        assert!(DelayOutput::build(&config, &sink_registry()).is_err());
    }

    #[test]
    fn plain_lines_pass_through() {
        let payload = to_payload("hello world\r".into(), PayloadFormat::Plain).unwrap();
        assert_eq!(payload.as_bytes(), b"hello world");
        assert_eq!(payload.format(), PayloadFormat::Plain);
        assert!(to_payload("   ".into(), PayloadFormat::Plain).is_none());
    }

    #[test]
    fn json_lines_are_validated() {
        let payload = to_payload(r#"{"a":1}"#.into(), PayloadFormat::Json).unwrap();
        assert_eq!(payload.format(), PayloadFormat::Json);
        assert!(to_payload("{not json".into(), PayloadFormat::Json).is_none());
    }
}
