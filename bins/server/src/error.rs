#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Pipeline(#[from] delay_pipeline::PipelineError),

    #[error("scheduler task: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("shutdown timed out after {timeout_secs}s with {pending} events pending")]
    ShutdownTimeout { timeout_secs: f64, pending: usize },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
