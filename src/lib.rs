pub mod common;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod intake;
pub mod pipeline;
pub mod publish;

pub use config::Configuration;
pub use coordinator::{BatchSummary, Coordinator, CoordinatorBuilder};
pub use error::{AppError, BackendError, ConfigError, FrameReadError, SinkError, SourceError};
