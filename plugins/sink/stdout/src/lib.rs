//! Line-oriented console sink: one event per line, one `emit_one` per event.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use delay_api::{DeliveryCapability, EventRecord, EventSink, SinkError, SinkFactory};

// ═══════════════════════════════════════════════════════════════
//  StdoutConfig
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdoutConfig {
    /// Prefix each line with the arrival time (Unix ms).
    #[serde(default)]
    pub timestamp: bool,
}

// ═══════════════════════════════════════════════════════════════
//  StdoutSink
// ═══════════════════════════════════════════════════════════════

pub struct StdoutSink {
    writer: Mutex<Box<dyn Write + Send>>,
    config: StdoutConfig,
    lines: AtomicU64,
}

impl StdoutSink {
    pub fn new(config: StdoutConfig) -> Self {
        Self::with_writer(config, Box::new(std::io::stdout()))
    }

    /// Write to an arbitrary destination instead of stdout.
    pub fn with_writer(config: StdoutConfig, writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            config,
            lines: AtomicU64::new(0),
        }
    }

    /// Lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    fn write_line(&self, event: &EventRecord) -> Result<(), SinkError> {
        let mut line = Vec::with_capacity(event.payload().as_bytes().len() + 24);
        if self.config.timestamp {
            line.extend_from_slice(event.received_ms().to_string().as_bytes());
            line.push(b' ');
        }
        line.extend_from_slice(event.payload().as_bytes());
        line.push(b'\n');

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&line)?;
        self.lines.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl EventSink for StdoutSink {
    fn emit_one<'a>(&'a self, event: &'a EventRecord)
        -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move { self.write_line(event) })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(async move {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.flush()?;
            tracing::info!(sink = "stdout", lines = self.lines(), "flushed");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  StdoutSinkFactory
// ═══════════════════════════════════════════════════════════════

pub struct StdoutSinkFactory;

impl SinkFactory for StdoutSinkFactory {
    fn delivery(&self) -> DeliveryCapability {
        DeliveryCapability::Single
    }

    fn create(&self, config_json: &str) -> Result<Arc<dyn EventSink>, SinkError> {
        let config: StdoutConfig = serde_json::from_str(config_json)
            .map_err(|e| SinkError::config(format!("stdout sink: {e}")))?;
        Ok(Arc::new(StdoutSink::new(config)))
    }
}
