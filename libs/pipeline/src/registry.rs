use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use delay_api::{DeliveryCapability, SinkFactory};

use crate::config::{DelayConfig, config_json_or_empty};
use crate::dispatcher::{Delivery, Dispatcher};
use crate::PipelineError;

/// Sink factories by `out` name.
///
/// `resolve` is the single place where the selector is interpreted: it runs
/// once at construction and turns the config into a bound `Dispatcher`.
#[derive(Default)]
pub struct SinkRegistry {
    factories: BTreeMap<String, Arc<dyn SinkFactory>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn SinkFactory>) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the sink selected by `config.out` and bind it to a dispatcher.
    pub fn resolve(&self, config: &DelayConfig) -> Result<Dispatcher, PipelineError> {
        let factory = self.factories.get(&config.out).ok_or_else(|| {
            PipelineError::UnsupportedOutput {
                out: config.out.clone(),
                available: self.names().join(", "),
            }
        })?;

        let config_json = config_json_or_empty(&config.sink)?;
        let sink = factory.create(&config_json).map_err(|source| PipelineError::SinkInit {
            out: config.out.clone(),
            source,
        })?;

        let delivery = match factory.delivery() {
            DeliveryCapability::Single => Delivery::Single,
            DeliveryCapability::Batch => {
                let batch_size = NonZeroUsize::new(config.batch_size).ok_or_else(|| {
                    PipelineError::Config {
                        context: "batch_size",
                        detail: "must be greater than 0".into(),
                    }
                })?;
                Delivery::Batch { batch_size }
            }
        };

        tracing::info!(out = %config.out, delivery = ?delivery, "resolved sink");
        Ok(Dispatcher::new(config.out.clone(), sink, delivery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use delay_api::{EventSink, SinkError};

    struct NullSink;
    impl EventSink for NullSink {}

    struct Factory {
        delivery: DeliveryCapability,
        require_host: bool,
    }

    impl SinkFactory for Factory {
        fn delivery(&self) -> DeliveryCapability {
            self.delivery
        }

        fn create(&self, config_json: &str) -> Result<Arc<dyn EventSink>, SinkError> {
            if self.require_host && !config_json.contains("host") {
                return Err(SinkError::config("missing 'host'"));
            }
            Ok(Arc::new(NullSink))
        }
    }

    fn registry() -> SinkRegistry {
        let mut registry = SinkRegistry::new();
        registry
            .register("lines", Arc::new(Factory { delivery: DeliveryCapability::Single, require_host: false }))
            .register("bulk", Arc::new(Factory { delivery: DeliveryCapability::Batch, require_host: true }));
        registry
    }

    #[test]
    fn unknown_output_is_a_config_error() {
        let config = DelayConfig { out: "unsupported".into(), ..DelayConfig::default() };
        let err = registry().resolve(&config).err().unwrap();
        assert!(err.is_config());
        assert_eq!(err.to_string(), "unsupported output 'unsupported' (available: bulk, lines)");
    }

    #[test]
    fn delivery_follows_registered_capability() {
        let lines = DelayConfig { out: "lines".into(), ..DelayConfig::default() };
        assert_eq!(registry().resolve(&lines).unwrap().delivery(), Delivery::Single);

        let bulk = DelayConfig {
            out: "bulk".into(),
            batch_size: 3,
            sink: Some(toml::from_str("host = 'h'").unwrap()),
            ..DelayConfig::default()
        };
        assert_eq!(
            registry().resolve(&bulk).unwrap().delivery(),
            Delivery::Batch { batch_size: NonZeroUsize::new(3).unwrap() }
        );
    }

    #[test]
    fn missing_sink_parameter_fails_resolution() {
        let bulk = DelayConfig { out: "bulk".into(), ..DelayConfig::default() };
        let err = registry().resolve(&bulk).err().unwrap();
        assert!(matches!(err, PipelineError::SinkInit { .. }));
        assert!(err.is_config());
    }
}
