use crate::{
    config::Configuration,
    error::AppError,
    intake::{ImageSequenceSource, VideoSource},
    pipeline::orchestration::{ProcessingPipeline, VideoReport},
    publish::{JsonFileSink, ResultSink},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A video whose run failed, with the stage that failed it.
#[derive(Debug, Clone)]
pub struct VideoFailure {
    pub video: String,
    pub stage: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: Vec<VideoReport>,
    pub failures: Vec<VideoFailure>,
    /// Videos cancelled before their result was written.
    pub skipped: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.processed.len() + self.failures.len() + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Self, AppError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AppError::BatchFailed {
                failed: self.failures.len(),
                total: self.total(),
            })
        }
    }
}

/// Runs the pipeline over every listed video, one video at a time.
pub struct Coordinator {
    pipeline: ProcessingPipeline,
    suffix: Option<String>,
    videos: Vec<String>,
    cancel_token: CancellationToken,
}

impl Coordinator {
    fn new(pipeline: ProcessingPipeline, suffix: Option<String>, videos: Vec<String>) -> Self {
        Self {
            pipeline,
            suffix,
            videos,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Token that cancels the batch; the video in progress keeps what it has.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn wanted(&self, name: &str) -> bool {
        match &self.suffix {
            Some(suffix) => name.ends_with(suffix.as_str()),
            None => true,
        }
    }

    /// Named videos run as given; otherwise the source is listed and filtered by suffix.
    async fn selected_videos(&self) -> Result<Vec<String>, AppError> {
        if !self.videos.is_empty() {
            return Ok(self.videos.clone());
        }
        Ok(self
            .pipeline
            .source()
            .list_videos()
            .await
            .map_err(AppError::Listing)?
            .into_iter()
            .filter(|name| self.wanted(name))
            .collect())
    }

    pub async fn run(&self) -> Result<BatchSummary, AppError> {
        let videos = self.selected_videos().await?;
        info!(
            "Processing {} videos with backend '{}'",
            videos.len(),
            self.pipeline.backend_name()
        );

        let mut summary = BatchSummary::default();
        for (position, video) in videos.iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                summary.cancelled = true;
                let remaining = videos.len() - position;
                summary.skipped += remaining;
                warn!("Batch cancelled, {} videos not started", remaining);
                break;
            }

            match self.pipeline.process_video(video, &self.cancel_token).await {
                Ok(report) => summary.processed.push(report),
                Err(AppError::Cancelled { .. }) => summary.skipped += 1,
                Err(e) => {
                    error!("Video '{}' failed at {}: {}", video, e.stage(), e);
                    summary.failures.push(VideoFailure {
                        video: video.clone(),
                        stage: e.stage(),
                        message: e.to_string(),
                    });
                }
            }
        }
        if self.cancel_token.is_cancelled() {
            summary.cancelled = true;
        }

        info!(
            "Batch done: {} written, {} failed, {} skipped",
            summary.processed.len(),
            summary.failures.len(),
            summary.skipped
        );
        Ok(summary)
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct CoordinatorBuilder {
    configuration: Configuration,
    source: Option<Arc<dyn VideoSource>>,
    sink: Option<Arc<dyn ResultSink>>,
    pipeline: Option<ProcessingPipeline>,
}

impl CoordinatorBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            source: None,
            sink: None,
            pipeline: None,
        }
    }

    // Sets the frames root directory, this will override the default configuration.
    pub fn source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.configuration.source.root = root.into();
        self
    }

    // Sets the output directory, this will override the default configuration.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.configuration.output.dir = dir.into();
        self
    }

    // Only videos ending with this suffix are processed.
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.configuration.source.suffix = Some(suffix.into());
        self
    }

    // Processes exactly these videos instead of listing the source root.
    pub fn videos<I, S>(mut self, videos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configuration.source.videos = videos.into_iter().map(Into::into).collect();
        self
    }

    // Adjusts the number of concurrent backend calls per video.
    pub fn workers(mut self, workers: usize) -> Self {
        self.configuration.scheduler.workers = workers;
        self
    }

    pub fn source(mut self, source: Arc<dyn VideoSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Uses a ready pipeline; source, sink and backend settings are then ignored.
    pub fn pipeline(mut self, pipeline: ProcessingPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<Coordinator, AppError> {
        let configuration = self.configuration;
        configuration.validate()?;
        let suffix = configuration.source.suffix.clone();
        let videos = configuration.source.videos.clone();

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => {
                let source = self.source.unwrap_or_else(|| {
                    Arc::new(
                        ImageSequenceSource::new(
                            configuration.source.root.clone(),
                            configuration.source.frame_rate,
                        )
                        .with_location_prefix(configuration.source.location_prefix.clone()),
                    )
                });
                let sink = self.sink.unwrap_or_else(|| {
                    Arc::new(JsonFileSink::new(
                        configuration.output.dir.clone(),
                        configuration.detections_key(),
                    ))
                });
                ProcessingPipeline::from_configuration(&configuration, source, sink)?
            }
        };
        Ok(Coordinator::new(pipeline, suffix, videos))
    }
}
