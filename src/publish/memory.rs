use super::result_sink::ResultSink;
use crate::error::SinkError;
use crate::pipeline::aggregation::AggregatedResult;
use async_trait::async_trait;
use std::sync::Mutex;

/// Keeps written results in memory, in write order.
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<AggregatedResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<AggregatedResult> {
        match self.results.lock() {
            Ok(results) => results.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get(&self, video_name: &str) -> Option<AggregatedResult> {
        self.results()
            .into_iter()
            .find(|result| result.video_name() == video_name)
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn write(&self, _video_name: &str, result: &AggregatedResult) -> Result<(), SinkError> {
        let mut results = match self.results.lock() {
            Ok(results) => results,
            Err(poisoned) => poisoned.into_inner(),
        };
        results.push(result.clone());
        Ok(())
    }
}
