use std::time::Duration;

use serde::Deserialize;

use crate::PipelineError;

/// Largest accepted `delay` / `tick_interval`, in seconds.
const MAX_SECONDS: f64 = u32::MAX as f64;

// ═══════════════════════════════════════════════════════════════
//  Policies
// ═══════════════════════════════════════════════════════════════

/// What shutdown does with events still in the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Dispatch everything, ready or not.
    #[default]
    Flush,
    /// Discard with a warning.
    Drop,
    /// Fail the scheduler task with `PendingOnShutdown`.
    Error,
}

/// What a tick does with events whose dispatch failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log how many events were lost.
    #[default]
    Drop,
    /// Put them back at the buffer head for the next tick.
    Requeue,
}

// ═══════════════════════════════════════════════════════════════
//  Delay Config
// ═══════════════════════════════════════════════════════════════

/// Settings of one delay output. Built once at startup and never mutated.
#[derive(Debug, Clone, Deserialize)]
pub struct DelayConfig {
    /// Hold duration per event, in seconds.
    #[serde(default = "default_delay")]
    pub delay: f64,
    /// Max events per `emit_many` call (batch sinks only).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sink selector, resolved against the `SinkRegistry`.
    #[serde(default = "default_out")]
    pub out: String,
    /// Scheduler cadence in seconds. Defaults to `delay` (1s when `delay` is 0).
    #[serde(default)]
    pub tick_interval: Option<f64>,
    #[serde(default)]
    pub drain: DrainPolicy,
    #[serde(default)]
    pub on_dispatch_failure: FailurePolicy,
    /// Sink parameters, forwarded opaquely to the selected factory.
    #[serde(default)]
    pub sink: Option<toml::Value>,
}

fn default_delay() -> f64 {
    5.0
}
fn default_batch_size() -> usize {
    10_000
}
fn default_out() -> String {
    "stdout".into()
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            delay: default_delay(),
            batch_size: default_batch_size(),
            out: default_out(),
            tick_interval: None,
            drain: DrainPolicy::default(),
            on_dispatch_failure: FailurePolicy::default(),
            sink: None,
        }
    }
}

impl DelayConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.delay_duration()?;
        self.tick_duration()?;
        if self.batch_size == 0 {
            return Err(PipelineError::Config {
                context: "batch_size",
                detail: "must be greater than 0".into(),
            });
        }
        if self.out.trim().is_empty() {
            return Err(PipelineError::Config {
                context: "out",
                detail: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn delay_duration(&self) -> Result<Duration, PipelineError> {
        seconds("delay", self.delay)
    }

    /// Scheduler cadence. Always positive.
    pub fn tick_duration(&self) -> Result<Duration, PipelineError> {
        let tick = match self.tick_interval {
            Some(secs) => seconds("tick_interval", secs)?,
            None => self.delay_duration()?,
        };
        if !tick.is_zero() {
            return Ok(tick);
        }
        if self.tick_interval.is_some() {
            return Err(PipelineError::Config {
                context: "tick_interval",
                detail: "must be greater than 0".into(),
            });
        }
        Ok(Duration::from_secs(1))
    }
}

fn seconds(context: &'static str, secs: f64) -> Result<Duration, PipelineError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(PipelineError::Config {
            context,
            detail: format!("must be a non-negative number of seconds, got {secs}"),
        });
    }
    if secs > MAX_SECONDS {
        return Err(PipelineError::Config {
            context,
            detail: format!("{secs}s is too large (max {MAX_SECONDS}s)"),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

// ═══════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════

/// Serialize Option<toml::Value> into a JSON string (or "{}").
pub fn config_json_or_empty(val: &Option<toml::Value>) -> Result<String, PipelineError> {
    match val {
        Some(v) => Ok(serde_json::to_string(v)?),
        None => Ok("{}".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg: DelayConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.delay, 5.0);
        assert_eq!(cfg.batch_size, 10_000);
        assert_eq!(cfg.out, "stdout");
        assert_eq!(cfg.drain, DrainPolicy::Flush);
        assert_eq!(cfg.on_dispatch_failure, FailurePolicy::Drop);
        assert_eq!(cfg.tick_duration().unwrap(), Duration::from_secs(5));
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_policies_and_sink_table() {
        let cfg: DelayConfig = toml::from_str(
            r#"
            delay = 2.5
            out = "elasticsearch"
            tick_interval = 0.5
            drain = "error"
            on_dispatch_failure = "requeue"

            [sink]
            hosts = ["http://localhost:9200"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.delay_duration().unwrap(), Duration::from_millis(2500));
        assert_eq!(cfg.tick_duration().unwrap(), Duration::from_millis(500));
        assert_eq!(cfg.drain, DrainPolicy::Error);
        assert_eq!(cfg.on_dispatch_failure, FailurePolicy::Requeue);
        let json = config_json_or_empty(&cfg.sink).unwrap();
        assert_eq!(json, r#"{"hosts":["http://localhost:9200"]}"#);
    }

    #[test]
    fn zero_delay_ticks_every_second() {
        let cfg = DelayConfig { delay: 0.0, ..DelayConfig::default() };
        cfg.validate().unwrap();
        assert_eq!(cfg.tick_duration().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_bad_values() {
        let negative = DelayConfig { delay: -1.0, ..DelayConfig::default() };
        assert!(negative.validate().unwrap_err().is_config());

        let nan = DelayConfig { delay: f64::NAN, ..DelayConfig::default() };
        assert!(nan.validate().is_err());

        let huge = DelayConfig { delay: 1e30, ..DelayConfig::default() };
        assert!(huge.validate().is_err());

        let zero_batch = DelayConfig { batch_size: 0, ..DelayConfig::default() };
        assert!(zero_batch.validate().is_err());

        let zero_tick = DelayConfig { tick_interval: Some(0.0), ..DelayConfig::default() };
        assert!(zero_tick.validate().is_err());

        let no_out = DelayConfig { out: " ".into(), ..DelayConfig::default() };
        assert!(no_out.validate().is_err());
    }

    #[test]
    fn empty_sink_table_serializes_to_empty_object() {
        assert_eq!(config_json_or_empty(&None).unwrap(), "{}");
    }
}
