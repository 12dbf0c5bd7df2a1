use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use delay_api::{Ack, Payload, now_ms};

use crate::buffer::DelayBuffer;
use crate::config::DelayConfig;
use crate::dispatcher::{Delivery, Dispatcher};
use crate::registry::SinkRegistry;
use crate::scheduler::{SchedulerSettings, ShutdownReport, spawn_scheduler};
use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  DelayOutput: build → spawn → DelayInput::receive
// ═══════════════════════════════════════════════════════════════

/// A configured delay stage: one buffer, one bound sink, one scheduler.
///
/// Construction validates the config and resolves the sink, so an
/// unsupported `out` fails here before any event is accepted. `spawn`
/// consumes the output, so a buffer is only ever drained by one scheduler.
pub struct DelayOutput {
    buffer: Arc<DelayBuffer>,
    dispatcher: Dispatcher,
    settings: SchedulerSettings,
}

impl DelayOutput {
    pub fn build(config: &DelayConfig, registry: &SinkRegistry) -> Result<Self, PipelineError> {
        config.validate()?;
        let delay = config.delay_duration()?;
        let settings = SchedulerSettings {
            interval: config.tick_duration()?,
            drain: config.drain,
            on_failure: config.on_dispatch_failure,
        };
        let dispatcher = registry.resolve(config)?;

        tracing::info!(
            out = %config.out,
            delay_ms = delay.as_millis() as u64,
            interval_ms = settings.interval.as_millis() as u64,
            drain = ?settings.drain,
            on_failure = ?settings.on_failure,
            "delay output ready"
        );

        Ok(Self {
            buffer: Arc::new(DelayBuffer::new(delay)),
            dispatcher,
            settings,
        })
    }

    pub fn delivery(&self) -> Delivery {
        self.dispatcher.delivery()
    }

    /// Start the scheduler and hand back the producer side.
    ///
    /// Cancel `token` to stop; the handle resolves after the drain policy
    /// has run and the sink was flushed.
    pub fn spawn(
        self,
        token: CancellationToken,
    ) -> (DelayInput, JoinHandle<Result<ShutdownReport, PipelineError>>) {
        let input = DelayInput { buffer: self.buffer.clone() };
        let handle = spawn_scheduler(self.buffer, self.dispatcher, self.settings, token);
        (input, handle)
    }
}

// ═══════════════════════════════════════════════════════════════
//  DelayInput
// ═══════════════════════════════════════════════════════════════

/// Producer handle of a running output. Cloning shares the same buffer.
#[derive(Clone)]
pub struct DelayInput {
    buffer: Arc<DelayBuffer>,
}

impl DelayInput {
    /// Accept an event. Never fails and never waits on the sink; the ack
    /// carries no delivery guarantee.
    pub fn receive(&self, payload: Payload) -> Ack {
        let now = tokio::time::Instant::now().into_std();
        let pending = self.buffer.enqueue(payload, now, now_ms());
        let ack = Ack::Accepted;
        tracing::debug!(
            %ack,
            release_in_ms = self.buffer.delay().as_millis() as u64,
            pending,
            "event buffered"
        );
        ack
    }

    /// Events currently held.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
