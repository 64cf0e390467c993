pub mod instrumented;
pub mod processing_pipeline;
pub mod retry;
pub mod scheduler;
pub mod service;

pub use instrumented::CallTimingLayer;
pub use processing_pipeline::{
    AnalysisService, ProcessingPipeline, ProcessingPipelineBuilder, VideoReport,
};
pub use retry::RetryPolicy;
pub use scheduler::{ConcurrencyScheduler, ScheduleOutcome};
