use super::result_sink::ResultSink;
use crate::error::SinkError;
use crate::pipeline::aggregation::{AggregatedResult, DetectionsKey};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Writes `<dir>/<video_name>.json`, pretty-printed.
///
/// The record goes to a temporary file in the same directory first and is
/// then renamed over the target, so readers never see a partial file.
pub struct JsonFileSink {
    dir: PathBuf,
    key: DetectionsKey,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>, key: DetectionsKey) -> Self {
        Self {
            dir: dir.into(),
            key,
        }
    }

    pub fn path_for(&self, video_name: &str) -> PathBuf {
        self.dir.join(format!("{video_name}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn write(&self, video_name: &str, result: &AggregatedResult) -> Result<(), SinkError> {
        let text = result.to_json_pretty(self.key)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SinkError::Write {
                path: self.dir.clone(),
                source,
            })?;

        let target = self.path_for(video_name);
        let temp = self
            .dir
            .join(format!(".{video_name}.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp, text.as_bytes())
            .await
            .map_err(|source| SinkError::Write {
                path: temp.clone(),
                source,
            })?;

        if let Err(source) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(SinkError::Write {
                path: target,
                source,
            });
        }

        info!("Wrote {} detections to {}", result.detections().len(), target.display());
        Ok(())
    }
}
