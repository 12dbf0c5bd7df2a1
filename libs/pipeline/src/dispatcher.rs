use std::num::NonZeroUsize;
use std::sync::Arc;

use delay_api::{EventRecord, EventSink, SinkError};

/// How a ready set is handed to the sink. Fixed at construction from the
/// sink's registered capability and `batch_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// One `emit_one` per event.
    Single,
    /// `emit_many` over chunks `[0,B), [B,2B), ...`; the last one may be short.
    Batch { batch_size: NonZeroUsize },
}

/// A delivery call failed part-way through a ready set.
///
/// `undelivered` holds the events of the failed call followed by every event
/// after it, still in order.
#[derive(Debug, thiserror::Error)]
#[error("dispatch failed after {delivered} events: {source}")]
pub struct DispatchFailure {
    pub delivered: usize,
    pub undelivered: Vec<EventRecord>,
    pub source: SinkError,
}

/// Drives delivery of extracted events through the bound sink.
///
/// No retries here: the first failing call stops the dispatch and the
/// remainder is returned to the caller.
#[derive(Clone)]
pub struct Dispatcher {
    name: String,
    sink: Arc<dyn EventSink>,
    delivery: Delivery,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, sink: Arc<dyn EventSink>, delivery: Delivery) -> Self {
        Self {
            name: name.into(),
            sink,
            delivery,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Deliver `events` in order. Returns how many were delivered.
    pub async fn dispatch(&self, mut events: Vec<EventRecord>) -> Result<usize, DispatchFailure> {
        let total = events.len();
        let step = match self.delivery {
            Delivery::Single => 1,
            Delivery::Batch { batch_size } => batch_size.get(),
        };

        let mut delivered = 0;
        while delivered < total {
            let end = (delivered + step).min(total);
            let result = match self.delivery {
                Delivery::Single => self.sink.emit_one(&events[delivered]).await,
                Delivery::Batch { .. } => self.sink.emit_many(&events[delivered..end]).await,
            };
            if let Err(source) = result {
                let undelivered = events.split_off(delivered);
                return Err(DispatchFailure { delivered, undelivered, source });
            }
            tracing::trace!(sink = %self.name, from = delivered, to = end, "delivered");
            delivered = end;
        }
        Ok(total)
    }

    pub async fn flush(&self) -> Result<(), SinkError> {
        self.sink.flush().await
    }
}
