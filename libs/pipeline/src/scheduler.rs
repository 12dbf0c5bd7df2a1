use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::buffer::{DelayBuffer, verify_order};
use crate::config::{DrainPolicy, FailurePolicy};
use crate::dispatcher::{DispatchFailure, Dispatcher};
use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  Scheduler task: tick → extract ready prefix → dispatch
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Tick cadence. Must be positive.
    pub interval: Duration,
    pub drain: DrainPolicy,
    pub on_failure: FailurePolicy,
}

/// Counters returned when the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub ticks: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub requeued: u64,
}

/// Start the scheduler: every `interval` extract the ready prefix and
/// dispatch it, until `token` is cancelled; then apply the drain policy and
/// flush the sink.
///
/// Dispatch is awaited inside the loop, so a slow sink delays the next tick
/// instead of overlapping it. Producers are never blocked by it because the
/// buffer lock is released before dispatch starts.
pub fn spawn_scheduler(
    buffer: Arc<DelayBuffer>,
    dispatcher: Dispatcher,
    settings: SchedulerSettings,
    token: CancellationToken,
) -> JoinHandle<Result<ShutdownReport, PipelineError>> {
    tokio::spawn(run_scheduler(buffer, dispatcher, settings, token))
}

async fn run_scheduler(
    buffer: Arc<DelayBuffer>,
    dispatcher: Dispatcher,
    settings: SchedulerSettings,
    token: CancellationToken,
) -> Result<ShutdownReport, PipelineError> {
    let mut report = ShutdownReport::default();
    let mut ticker = tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        sink = %dispatcher.name(),
        interval_ms = settings.interval.as_millis() as u64,
        delay_ms = buffer.delay().as_millis() as u64,
        "scheduler started"
    );

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                report.ticks += 1;
                tick(&buffer, &dispatcher, settings.on_failure, &mut report).await?;
            }
        }
    }

    drain(&buffer, &dispatcher, settings.drain, &mut report).await?;

    tracing::info!(
        sink = %dispatcher.name(),
        ticks = report.ticks,
        delivered = report.delivered,
        dropped = report.dropped,
        requeued = report.requeued,
        "scheduler stopped"
    );
    Ok(report)
}

/// One tick. `now` is read once so the whole ready set is judged against the
/// same instant.
async fn tick(
    buffer: &DelayBuffer,
    dispatcher: &Dispatcher,
    on_failure: FailurePolicy,
    report: &mut ShutdownReport,
) -> Result<(), PipelineError> {
    let now = Instant::now().into_std();
    let ready = buffer.extract_ready(now);
    if ready.is_empty() {
        return Ok(());
    }
    if cfg!(debug_assertions) {
        verify_order(&ready)?;
    }

    let count = ready.len();
    match dispatcher.dispatch(ready).await {
        Ok(delivered) => {
            report.delivered += delivered as u64;
            tracing::debug!(sink = %dispatcher.name(), delivered, pending = buffer.len(), "tick dispatched");
        }
        Err(failure) => {
            report.delivered += failure.delivered as u64;
            handle_failure(buffer, dispatcher, on_failure, failure, count, report);
        }
    }
    Ok(())
}

fn handle_failure(
    buffer: &DelayBuffer,
    dispatcher: &Dispatcher,
    on_failure: FailurePolicy,
    failure: DispatchFailure,
    ready: usize,
    report: &mut ShutdownReport,
) {
    let undelivered = failure.undelivered.len();
    match on_failure {
        FailurePolicy::Drop => {
            report.dropped += undelivered as u64;
            tracing::error!(
                sink = %dispatcher.name(),
                error = ?failure.source,
                ready,
                delivered = failure.delivered,
                lost = undelivered,
                "dispatch error, events dropped"
            );
        }
        FailurePolicy::Requeue => {
            report.requeued += undelivered as u64;
            tracing::warn!(
                sink = %dispatcher.name(),
                error = ?failure.source,
                ready,
                delivered = failure.delivered,
                requeued = undelivered,
                "dispatch error, events requeued"
            );
            buffer.requeue_front(failure.undelivered);
        }
    }
}

async fn drain(
    buffer: &DelayBuffer,
    dispatcher: &Dispatcher,
    policy: DrainPolicy,
    report: &mut ShutdownReport,
) -> Result<(), PipelineError> {
    let pending = buffer.drain_all();
    let count = pending.len();

    let result = match policy {
        _ if count == 0 => Ok(()),
        DrainPolicy::Flush => {
            match dispatcher.dispatch(pending).await {
                Ok(delivered) => {
                    report.delivered += delivered as u64;
                    tracing::info!(sink = %dispatcher.name(), flushed = delivered, "flushed pending events");
                }
                Err(failure) => {
                    report.delivered += failure.delivered as u64;
                    report.dropped += failure.undelivered.len() as u64;
                    tracing::error!(
                        sink = %dispatcher.name(),
                        error = ?failure.source,
                        lost = failure.undelivered.len(),
                        "flush on shutdown failed"
                    );
                }
            }
            Ok(())
        }
        DrainPolicy::Drop => {
            report.dropped += count as u64;
            tracing::warn!(sink = %dispatcher.name(), dropped = count, "dropping pending events on shutdown");
            Ok(())
        }
        DrainPolicy::Error => {
            report.dropped += count as u64;
            Err(PipelineError::PendingOnShutdown { count })
        }
    };

    if let Err(e) = dispatcher.flush().await {
        tracing::error!(sink = %dispatcher.name(), error = ?e, "sink flush error");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::future::Future;
    use std::num::NonZeroUsize;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use delay_api::{EventRecord, EventSink, Payload, SinkError};

    use crate::dispatcher::Delivery;

    /// Collects delivered payloads; the first `fail_calls` calls are rejected.
    #[derive(Default)]
    struct CollectingSink {
        seen: Mutex<Vec<String>>,
        calls: AtomicUsize,
        fail_calls: usize,
        flushed: AtomicUsize,
    }

    impl CollectingSink {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl EventSink for CollectingSink {
        fn emit_many<'a>(&'a self, events: &'a [EventRecord])
            -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
            Box::pin(async move {
                if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_calls {
                    return Err(SinkError::io("backend down"));
                }
                let mut seen = self.seen.lock().unwrap();
                for e in events {
                    seen.push(String::from_utf8_lossy(e.payload().as_bytes()).into_owned());
                }
                Ok(())
            })
        }

        fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
            self.flushed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn settings(drain: DrainPolicy, on_failure: FailurePolicy) -> SchedulerSettings {
        SchedulerSettings { interval: Duration::from_millis(100), drain, on_failure }
    }

    fn setup(sink: Arc<CollectingSink>, delay_ms: u64) -> (Arc<DelayBuffer>, Dispatcher) {
        let buffer = Arc::new(DelayBuffer::new(Duration::from_millis(delay_ms)));
        let dispatcher = Dispatcher::new(
            "test",
            sink,
            Delivery::Batch { batch_size: NonZeroUsize::new(2).unwrap() },
        );
        (buffer, dispatcher)
    }

    fn push(buffer: &DelayBuffer, name: &str) {
        buffer.enqueue(Payload::plain(name), Instant::now().into_std(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn releases_events_after_delay_in_order() {
        let sink = Arc::new(CollectingSink::default());
        let (buffer, dispatcher) = setup(sink.clone(), 250);
        let token = CancellationToken::new();
        let handle = spawn_scheduler(buffer.clone(), dispatcher, settings(DrainPolicy::Drop, FailurePolicy::Drop), token.clone());

        for name in ["a", "b", "c"] {
            push(&buffer, name);
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(sink.seen().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.seen(), ["a", "b", "c"]);
        assert!(buffer.is_empty());

        token.cancel();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.dropped, 0);
        assert_eq!(sink.flushed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_drops_and_loop_continues() {
        let sink = Arc::new(CollectingSink { fail_calls: 1, ..CollectingSink::default() });
        let (buffer, dispatcher) = setup(sink.clone(), 0);
        let token = CancellationToken::new();
        let handle = spawn_scheduler(buffer.clone(), dispatcher, settings(DrainPolicy::Drop, FailurePolicy::Drop), token.clone());

        push(&buffer, "lost");
        tokio::time::sleep(Duration::from_millis(150)).await;
        push(&buffer, "kept");
        tokio::time::sleep(Duration::from_millis(100)).await;

        token.cancel();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(sink.seen(), ["kept"]);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_requeues_ahead_of_later_events() {
        let sink = Arc::new(CollectingSink { fail_calls: 1, ..CollectingSink::default() });
        let (buffer, dispatcher) = setup(sink.clone(), 0);
        let token = CancellationToken::new();
        let handle = spawn_scheduler(buffer.clone(), dispatcher, settings(DrainPolicy::Drop, FailurePolicy::Requeue), token.clone());

        push(&buffer, "first");
        tokio::time::sleep(Duration::from_millis(150)).await;
        push(&buffer, "second");
        tokio::time::sleep(Duration::from_millis(100)).await;

        token.cancel();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(sink.seen(), ["first", "second"]);
        assert_eq!(report.requeued, 1);
        assert_eq!(report.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_drain_delivers_pending_events() {
        let sink = Arc::new(CollectingSink::default());
        let (buffer, dispatcher) = setup(sink.clone(), 60_000);
        let token = CancellationToken::new();
        let handle = spawn_scheduler(buffer.clone(), dispatcher, settings(DrainPolicy::Flush, FailurePolicy::Drop), token.clone());

        push(&buffer, "x");
        push(&buffer, "y");
        push(&buffer, "z");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(sink.seen().is_empty());

        token.cancel();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(sink.seen(), ["x", "y", "z"]);
        assert_eq!(report.delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_drain_discards_pending_events() {
        let sink = Arc::new(CollectingSink::default());
        let (buffer, dispatcher) = setup(sink.clone(), 60_000);
        let token = CancellationToken::new();
        let handle = spawn_scheduler(buffer.clone(), dispatcher, settings(DrainPolicy::Drop, FailurePolicy::Drop), token.clone());

        push(&buffer, "x");
        token.cancel();
        let report = handle.await.unwrap().unwrap();
        assert!(sink.seen().is_empty());
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_drain_reports_pending_count() {
        let sink = Arc::new(CollectingSink::default());
        let (buffer, dispatcher) = setup(sink.clone(), 60_000);
        let token = CancellationToken::new();
        let handle = spawn_scheduler(buffer.clone(), dispatcher, settings(DrainPolicy::Error, FailurePolicy::Drop), token.clone());

        push(&buffer, "x");
        push(&buffer, "y");
        token.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::PendingOnShutdown { count: 2 }));
        // the sink is still flushed
        assert_eq!(sink.flushed.load(Ordering::SeqCst), 1);
    }

    /// Batch sink whose every call takes 250ms; records when each call began.
    #[derive(Default)]
    struct SlowSink {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        started: Mutex<Vec<Instant>>,
        seen: Mutex<Vec<String>>,
    }

    impl EventSink for SlowSink {
        fn emit_many<'a>(&'a self, events: &'a [EventRecord])
            -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
            Box::pin(async move {
                self.started.lock().unwrap().push(Instant::now());
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(250)).await;
                self.seen.lock().unwrap().extend(
                    events.iter().map(|e| String::from_utf8_lossy(e.payload().as_bytes()).into_owned()),
                );
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dispatch_delays_next_tick_instead_of_overlapping() {
        let sink = Arc::new(SlowSink::default());
        let buffer = Arc::new(DelayBuffer::new(Duration::ZERO));
        let dispatcher = Dispatcher::new(
            "slow",
            sink.clone(),
            Delivery::Batch { batch_size: NonZeroUsize::new(2).unwrap() },
        );
        let token = CancellationToken::new();
        let handle = spawn_scheduler(buffer.clone(), dispatcher, settings(DrainPolicy::Drop, FailurePolicy::Drop), token.clone());

        push(&buffer, "a");
        push(&buffer, "b");
        // first tick at 100ms runs until 350ms; two ticks are missed meanwhile
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.in_flight.load(Ordering::SeqCst), 1);
        push(&buffer, "c");

        tokio::time::sleep(Duration::from_millis(850)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*sink.seen.lock().unwrap(), ["a", "b", "c"]);
        assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
        let started = sink.started.lock().unwrap().clone();
        assert_eq!(started.len(), 2);
        assert!(started[1] - started[0] >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn error_drain_with_empty_buffer_is_ok() {
        let sink = Arc::new(CollectingSink::default());
        let (buffer, dispatcher) = setup(sink, 0);
        let token = CancellationToken::new();
        let handle = spawn_scheduler(buffer, dispatcher, settings(DrainPolicy::Error, FailurePolicy::Drop), token.clone());

        token.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
