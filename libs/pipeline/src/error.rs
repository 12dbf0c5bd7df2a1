#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("unsupported output '{out}' (available: {available})")]
    UnsupportedOutput { out: String, available: String },

    #[error("sink init ({out}): {source}")]
    SinkInit { out: String, source: delay_api::SinkError },

    #[error("config serialization: {0}")]
    ConfigSerialization(#[from] serde_json::Error),

    #[error("buffer out of release order at index {index}")]
    InvariantViolation { index: usize },

    #[error("{count} events still buffered at shutdown")]
    PendingOnShutdown { count: usize },
}

impl PipelineError {
    /// Startup-time configuration failure (nothing has been accepted yet).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipelineError::Config { .. }
                | PipelineError::UnsupportedOutput { .. }
                | PipelineError::SinkInit { .. }
                | PipelineError::ConfigSerialization(_)
        )
    }
}
