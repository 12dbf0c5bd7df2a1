use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{EventRecord, SinkError};

// ════════════════════════════════════════════════════════════════
//  Sink Traits
// ════════════════════════════════════════════════════════════════

/// Which delivery mode a sink variant implements.
///
/// Declared by the factory, so the dispatcher learns it from configuration
/// and never has to probe the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCapability {
    /// `emit_one` per event.
    Single,
    /// `emit_many` with chunks of at most `batch_size` events.
    Batch,
}

/// Downstream delivery target.
///
/// A variant implements the method matching its `DeliveryCapability`; the
/// default for the other one reports `ErrorKind::Unsupported`. The sink owns
/// its connections and any retry/backoff.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit_one<'a>(&'a self, _event: &'a EventRecord)
        -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async { Err(SinkError::unsupported("single-event delivery not supported")) })
    }

    /// Deliver a chunk of events in order.
    fn emit_many<'a>(&'a self, _events: &'a [EventRecord])
        -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async { Err(SinkError::unsupported("batch delivery not supported")) })
    }

    /// Flush buffers (called once on graceful shutdown).
    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Builds a sink from its opaque JSON parameters.
///
/// Registered under the `out` name it serves. Parameter validation happens in
/// `create`, so a bad sink table fails at startup.
pub trait SinkFactory: Send + Sync {
    fn delivery(&self) -> DeliveryCapability;

    fn create(&self, config_json: &str) -> Result<Arc<dyn EventSink>, SinkError>;
}
