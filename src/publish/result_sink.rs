use crate::error::SinkError;
use crate::pipeline::aggregation::AggregatedResult;
use async_trait::async_trait;

/// Destination for finished per-video results. Writes are not retried.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn write(&self, video_name: &str, result: &AggregatedResult) -> Result<(), SinkError>;
}
