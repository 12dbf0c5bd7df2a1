pub mod config;
pub mod error;
mod buffer;
mod dispatcher;
mod output;
mod registry;
mod scheduler;

pub use error::PipelineError;
pub use buffer::DelayBuffer;
pub use dispatcher::{Delivery, DispatchFailure, Dispatcher};
pub use output::{DelayInput, DelayOutput};
pub use registry::SinkRegistry;
pub use scheduler::{SchedulerSettings, ShutdownReport, spawn_scheduler};
