mod error;
mod sink;
mod util;

pub use error::{ErrorKind, SinkError};
pub use sink::{DeliveryCapability, EventSink, SinkFactory};
pub use util::{civil_from_ms, now_ms, resolve_path};

use std::time::Instant;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Payload
// ════════════════════════════════════════════════════════════════

/// How the bytes of a payload should be interpreted by sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Free-form text line.
    #[default]
    Plain,
    /// A serialized JSON value.
    Json,
}

/// Opaque event body with a format tag.
///
/// The buffer and dispatcher never look inside. Sinks render it:
/// the console sink prints the bytes, the bulk sink needs a JSON document
/// and wraps plain text as `{"message": ...}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    format: PayloadFormat,
}

impl Payload {
    pub fn new(bytes: Vec<u8>, format: PayloadFormat) -> Self {
        Self { bytes, format }
    }

    pub fn plain(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes.into(), PayloadFormat::Plain)
    }

    /// Serialize a JSON value into a `Json` payload.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SinkError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::new(bytes, PayloadFormat::Json))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Document view of the payload.
    ///
    /// `Json` payloads are parsed; `Plain` payloads become
    /// `{"message": "<lossy utf-8>"}`.
    pub fn to_document(&self) -> Result<serde_json::Value, SinkError> {
        match self.format {
            PayloadFormat::Json => Ok(serde_json::from_slice(&self.bytes)?),
            PayloadFormat::Plain => Ok(serde_json::json!({
                "message": String::from_utf8_lossy(&self.bytes),
            })),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  EventRecord
// ════════════════════════════════════════════════════════════════

/// A held event: payload plus the instant after which it may be released.
///
/// Immutable once built. The dispatcher lends it to the sink and drops it
/// once the delivery call succeeds.
#[derive(Clone, Debug)]
pub struct EventRecord {
    payload: Payload,
    release_at: Instant,
    received_ms: i64,
}

impl EventRecord {
    /// `received_ms` is the wall-clock arrival time (Unix ms); sinks use it
    /// for timestamps and date-based index names.
    pub fn new(payload: Payload, release_at: Instant, received_ms: i64) -> Self {
        Self { payload, release_at, received_ms }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn release_at(&self) -> Instant {
        self.release_at
    }

    pub fn received_ms(&self) -> i64 {
        self.received_ms
    }
}

// ════════════════════════════════════════════════════════════════
//  Ack
// ════════════════════════════════════════════════════════════════

/// Producer-side acknowledgement. Advisory only: it confirms the event was
/// buffered, not that it will reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Accepted,
}

impl std::fmt::Display for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ack::Accepted => f.write_str("Event received"),
        }
    }
}
