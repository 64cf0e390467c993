use crate::common::VideoHandle;
use crate::config::Configuration;
use crate::error::{AppError, BackendError};
use crate::intake::VideoSource;
use crate::pipeline::aggregation::Aggregator;
use crate::pipeline::backend::{
    AnalysisRequest, AnalysisScope, BackendFactory, DetectionBackend,
};
use crate::pipeline::context::metrics::RunStats;
use crate::pipeline::domain::{FrameResult, InterestFilter};
use crate::pipeline::orchestration::instrumented::CallTimingLayer;
use crate::pipeline::orchestration::retry::RetryPolicy;
use crate::pipeline::orchestration::scheduler::{ConcurrencyScheduler, ScheduleOutcome};
use crate::pipeline::orchestration::service::backend_service::BackendService;
use crate::pipeline::sampling::FrameSampler;
use crate::publish::ResultSink;
use futures::{future, stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::retry::RetryLayer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{BoxError, ServiceBuilder};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Backend call stack as seen by the scheduler: frame timeout, retry, timing, backend.
pub type AnalysisService = BoxCloneService<AnalysisRequest, FrameResult, BoxError>;

/// What happened to one video.
#[derive(Debug, Clone)]
pub struct VideoReport {
    pub video_name: String,
    pub run_id: Uuid,
    pub detections: usize,
    pub stats: RunStats,
}

/// Runs one video from source to sink: sample, analyze, merge, write.
pub struct ProcessingPipeline {
    source: Arc<dyn VideoSource>,
    sink: Arc<dyn ResultSink>,
    backend: Arc<dyn DetectionBackend>,
    sampler: FrameSampler,
    scheduler: ConcurrencyScheduler,
    retry: RetryPolicy,
    call_timeout: Option<Duration>,
    frame_timeout: Option<Duration>,
    video_timeout: Option<Duration>,
    interests: InterestFilter,
}

impl ProcessingPipeline {
    pub fn builder(
        source: Arc<dyn VideoSource>,
        sink: Arc<dyn ResultSink>,
        backend: Arc<dyn DetectionBackend>,
    ) -> ProcessingPipelineBuilder {
        ProcessingPipelineBuilder::new(source, sink, backend)
    }

    /// Builds the backend named in `configuration` and wires it up with the
    /// configured sampling, scheduling and retry settings.
    pub fn from_configuration(
        configuration: &Configuration,
        source: Arc<dyn VideoSource>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, AppError> {
        configuration.validate()?;
        let interests = InterestFilter::new(&configuration.interests);
        let backend = BackendFactory::create(&configuration.backend, &interests)?;
        Ok(Self::builder(source, sink, backend)
            .sampler(configuration.sampling.sampler())
            .workers(configuration.scheduler.workers)
            .retry_policy(configuration.retry.policy())
            .call_timeout(configuration.scheduler.call_timeout())
            .frame_timeout(configuration.scheduler.frame_timeout())
            .video_timeout(configuration.scheduler.video_timeout())
            .interests(interests)
            .build())
    }

    pub fn source(&self) -> &Arc<dyn VideoSource> {
        &self.source
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// A fresh service stack around the backend.
    pub fn analysis_service(&self) -> AnalysisService {
        let service = ServiceBuilder::new()
            .option_layer(self.frame_timeout.map(TimeoutLayer::new))
            .map_err(|error: BackendError| BoxError::from(error))
            .layer(RetryLayer::new(self.retry.clone()))
            .layer(CallTimingLayer::new(self.backend.name()))
            .service(BackendService::new(self.backend.clone()).with_call_timeout(self.call_timeout));
        BoxCloneService::new(service)
    }

    /// Produces and writes exactly one result for `video_name`.
    ///
    /// Unreadable frames and frames the backend failed on are left out of the
    /// result. A deadline stops the analysis early, and what completed so far is
    /// still merged and written. A cancelled video writes nothing, so an earlier
    /// result for it stays in place. Source and sink failures abort the video.
    #[instrument(skip(self, cancel), fields(run_id = tracing::field::Empty, backend = self.backend.name()))]
    pub async fn process_video(
        &self,
        video_name: &str,
        cancel: &CancellationToken,
    ) -> Result<VideoReport, AppError> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let deadline = self.video_timeout.map(|timeout| Instant::now() + timeout);

        let handle = self
            .source
            .open_video(video_name)
            .await
            .map_err(|source| AppError::Source {
                video: video_name.to_string(),
                source,
            })?;

        let outcome = self.analyze(&handle, deadline, cancel).await;
        if outcome.stats.cancelled {
            warn!(
                "'{}' cancelled after {} analyzed frames, nothing written",
                video_name, outcome.stats.analyzed
            );
            return Err(AppError::Cancelled {
                video: video_name.to_string(),
            });
        }

        let mut aggregator =
            Aggregator::new(self.backend.confidence_kind()).with_interests(self.interests.clone());
        aggregator.merge_all(outcome.results);
        let result = aggregator.finish(video_name);

        self.sink
            .write(video_name, &result)
            .await
            .map_err(|source| AppError::Sink {
                video: video_name.to_string(),
                source,
            })?;

        let stats = outcome.stats;
        info!(
            "Finished '{}': {} detections from {} analyzed frames ({} failed, {} unreadable) in {}ms",
            video_name,
            result.detections().len(),
            stats.analyzed,
            stats.failed,
            stats.unreadable,
            stats.elapsed.as_millis()
        );

        Ok(VideoReport {
            video_name: video_name.to_string(),
            run_id,
            detections: result.detections().len(),
            stats,
        })
    }

    async fn analyze(
        &self,
        handle: &VideoHandle,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> ScheduleOutcome {
        if handle.total_frames() == 0 {
            info!("'{}' has no frames", handle.name());
            return ScheduleOutcome::default();
        }

        match self.backend.scope() {
            AnalysisScope::Video => {
                info!("Submitting '{}' as a whole video", handle.name());
                let request = AnalysisRequest::Video(handle.clone());
                let jobs = stream::iter(std::iter::once(future::ready(Ok(request))));
                self.scheduler
                    .run(self.analysis_service(), jobs, deadline, cancel)
                    .await
            }
            AnalysisScope::Frame => {
                info!(
                    "Sampling {} of {} frames from '{}' with {} workers",
                    self.sampler
                        .expected_count(handle.total_frames(), handle.frame_rate()),
                    handle.total_frames(),
                    handle.name(),
                    self.scheduler.workers()
                );
                let indices = self
                    .sampler
                    .sample(handle.total_frames(), handle.frame_rate());
                let source = self.source.clone();
                let handle = handle.clone();
                let jobs = stream::iter(indices).map(move |index| {
                    let source = source.clone();
                    let handle = handle.clone();
                    async move {
                        source
                            .read_frame(&handle, index)
                            .await
                            .map(AnalysisRequest::Frame)
                    }
                });
                self.scheduler
                    .run(self.analysis_service(), jobs, deadline, cancel)
                    .await
            }
        }
    }
}

pub struct ProcessingPipelineBuilder {
    source: Arc<dyn VideoSource>,
    sink: Arc<dyn ResultSink>,
    backend: Arc<dyn DetectionBackend>,
    sampler: FrameSampler,
    workers: usize,
    retry: RetryPolicy,
    call_timeout: Option<Duration>,
    frame_timeout: Option<Duration>,
    video_timeout: Option<Duration>,
    interests: InterestFilter,
}

impl ProcessingPipelineBuilder {
    pub fn new(
        source: Arc<dyn VideoSource>,
        sink: Arc<dyn ResultSink>,
        backend: Arc<dyn DetectionBackend>,
    ) -> Self {
        Self {
            source,
            sink,
            backend,
            sampler: FrameSampler::default(),
            workers: ConcurrencyScheduler::default().workers(),
            retry: RetryPolicy::default(),
            call_timeout: None,
            frame_timeout: None,
            video_timeout: None,
            interests: InterestFilter::default(),
        }
    }

    pub fn sampler(mut self, sampler: FrameSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn frame_timeout(mut self, frame_timeout: Option<Duration>) -> Self {
        self.frame_timeout = frame_timeout;
        self
    }

    pub fn video_timeout(mut self, video_timeout: Option<Duration>) -> Self {
        self.video_timeout = video_timeout;
        self
    }

    pub fn interests(mut self, interests: InterestFilter) -> Self {
        self.interests = interests;
        self
    }

    pub fn build(self) -> ProcessingPipeline {
        ProcessingPipeline {
            source: self.source,
            sink: self.sink,
            backend: self.backend,
            sampler: self.sampler,
            scheduler: ConcurrencyScheduler::new(self.workers),
            retry: self.retry,
            call_timeout: self.call_timeout,
            frame_timeout: self.frame_timeout,
            video_timeout: self.video_timeout,
            interests: self.interests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::InMemoryVideoSource;
    use crate::pipeline::domain::{Confidence, ConfidenceKind, ConfidenceLevel, Detection};
    use crate::pipeline::sampling::SamplingPolicy;
    use crate::publish::MemorySink;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers from a per-frame script; frames without an entry get nothing.
    #[derive(Default)]
    struct ScriptedBackend {
        scope: Option<AnalysisScope>,
        ordinal: bool,
        replies: HashMap<u64, Vec<Detection>>,
        /// Number of transient failures to return before answering, per frame.
        flaky: HashMap<u64, usize>,
        stall: Vec<u64>,
        calls: AtomicUsize,
        seen: Mutex<HashMap<u64, usize>>,
    }

    #[async_trait]
    impl DetectionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn scope(&self) -> AnalysisScope {
            self.scope.unwrap_or(AnalysisScope::Frame)
        }

        fn confidence_kind(&self) -> ConfidenceKind {
            if self.ordinal {
                ConfidenceKind::Ordinal
            } else {
                ConfidenceKind::Numeric
            }
        }

        async fn analyze(&self, request: &AnalysisRequest) -> Result<FrameResult, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index = request.frame_index();
            if self.stall.contains(&index) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let attempt = {
                let mut seen = self.seen.lock().unwrap();
                let count = seen.entry(index).or_insert(0);
                *count += 1;
                *count
            };
            if attempt <= self.flaky.get(&index).copied().unwrap_or(0) {
                return Err(BackendError::Transient("quota exceeded".to_string()));
            }
            let detections = self.replies.get(&index).cloned().unwrap_or_default();
            Ok(FrameResult::new(index, detections))
        }
    }

    fn numeric(label: &str, score: f64) -> Detection {
        Detection::new(label, Confidence::Score(score))
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
            .with_jitter(false)
    }

    fn pipeline(
        source: InMemoryVideoSource,
        backend: ScriptedBackend,
    ) -> (ProcessingPipelineBuilder, Arc<MemorySink>, Arc<ScriptedBackend>) {
        let sink = Arc::new(MemorySink::new());
        let backend = Arc::new(backend);
        let builder = ProcessingPipeline::builder(Arc::new(source), sink.clone(), backend.clone())
            .retry_policy(fast_retry(5));
        (builder, sink, backend)
    }

    #[tokio::test]
    async fn test_merges_sampled_frames_into_one_result() {
        let source = InMemoryVideoSource::new().with_blank_video("clip.mp4", 30.0, 120);
        let backend = ScriptedBackend {
            replies: HashMap::from([
                (0, vec![numeric("cat", 0.8)]),
                (60, vec![numeric("Cat", 0.6), numeric("dog", 0.9)]),
                (1, vec![numeric("never sampled", 1.0)]),
            ]),
            ..Default::default()
        };
        let (builder, sink, backend) = pipeline(source, backend);
        let pipeline = builder.workers(2).build();

        let report = pipeline
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.analyzed, 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        let result = sink.get("clip.mp4").unwrap();
        assert_eq!(
            result.detections(),
            &[numeric("DOG", 0.9), numeric("CAT", 0.8)]
        );
    }

    #[tokio::test]
    async fn test_zero_frames_writes_empty_result() {
        let source = InMemoryVideoSource::new().with_video("empty.mp4", 30.0, Vec::new());
        let (builder, sink, backend) = pipeline(source, ScriptedBackend::default());

        let report = builder
            .build()
            .process_video("empty.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.detections, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(sink.get("empty.mp4").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_below_limit_do_not_change_result() {
        let replies = HashMap::from([(0, vec![numeric("car", 0.7)])]);
        let source = || InMemoryVideoSource::new().with_blank_video("clip.mp4", 30.0, 1);

        let (builder, steady_sink, _) = pipeline(
            source(),
            ScriptedBackend {
                replies: replies.clone(),
                ..Default::default()
            },
        );
        builder
            .build()
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        let (builder, flaky_sink, _) = pipeline(
            source(),
            ScriptedBackend {
                replies: replies.clone(),
                flaky: HashMap::from([(0, 4)]),
                ..Default::default()
            },
        );
        builder
            .build()
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(steady_sink.results(), flaky_sink.results());

        let (builder, exhausted_sink, _) = pipeline(
            source(),
            ScriptedBackend {
                replies,
                flaky: HashMap::from([(0, 5)]),
                ..Default::default()
            },
        );
        let report = builder
            .build()
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.stats.failed, 1);
        assert!(exhausted_sink.get("clip.mp4").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_frame_is_skipped() {
        let source = InMemoryVideoSource::new().with_video(
            "clip.mp4",
            30.0,
            vec![Some(image::DynamicImage::new_rgb8(2, 2)), None],
        );
        let backend = ScriptedBackend {
            replies: HashMap::from([(0, vec![numeric("tree", 0.4)])]),
            ..Default::default()
        };
        let (builder, sink, _) = pipeline(source, backend);
        let pipeline = builder
            .sampler(FrameSampler::new(SamplingPolicy::FixedStride { step: 1 }))
            .build();

        let report = pipeline
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.stats.unreadable, 1);
        assert_eq!(sink.get("clip.mp4").unwrap().detections().len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_keeps_completed_frames() {
        let source = InMemoryVideoSource::new().with_blank_video("clip.mp4", 30.0, 180);
        let backend = ScriptedBackend {
            replies: HashMap::from([
                (0, vec![numeric("bus", 0.5)]),
                (60, vec![numeric("bike", 0.6)]),
                (120, vec![numeric("never", 0.9)]),
            ]),
            stall: vec![120],
            ..Default::default()
        };
        let (builder, sink, _) = pipeline(source, backend);
        let pipeline = builder
            .workers(3)
            .video_timeout(Some(Duration::from_millis(300)))
            .build();

        let report = pipeline
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.stats.deadline_expired);
        let result = sink.get("clip.mp4").unwrap();
        assert_eq!(result.detections(), &[numeric("BIKE", 0.6), numeric("BUS", 0.5)]);
    }

    #[tokio::test]
    async fn test_cancelled_video_writes_nothing() {
        let source = InMemoryVideoSource::new().with_blank_video("clip.mp4", 30.0, 180);
        let backend = ScriptedBackend {
            replies: HashMap::from([(0, vec![numeric("bus", 0.5)])]),
            stall: vec![60],
            ..Default::default()
        };
        let (builder, sink, backend) = pipeline(source, backend);
        let pipeline = builder.workers(1).build();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let error = pipeline
            .process_video("clip.mp4", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(error, AppError::Cancelled { ref video } if video == "clip.mp4"));
        assert_eq!(error.stage(), "cancelled");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(sink.results().is_empty());
    }

    #[tokio::test]
    async fn test_frame_timeout_fails_only_the_stalled_frame() {
        let source = InMemoryVideoSource::new().with_blank_video("clip.mp4", 30.0, 120);
        let backend = ScriptedBackend {
            replies: HashMap::from([(60, vec![numeric("kite", 0.3)])]),
            stall: vec![0],
            ..Default::default()
        };
        let (builder, sink, _) = pipeline(source, backend);
        let pipeline = builder
            .workers(1)
            .frame_timeout(Some(Duration::from_millis(50)))
            .build();

        let report = pipeline
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.analyzed, 1);
        assert!(report.stats.is_complete());
        assert_eq!(sink.get("clip.mp4").unwrap().detections(), &[numeric("KITE", 0.3)]);
    }

    #[tokio::test]
    async fn test_video_scope_backend_is_called_once() {
        let source = InMemoryVideoSource::new().with_blank_video("clip.mp4", 30.0, 600);
        let backend = ScriptedBackend {
            scope: Some(AnalysisScope::Video),
            replies: HashMap::from([(0, vec![numeric("person", 0.95)])]),
            ..Default::default()
        };
        let (builder, sink, backend) = pipeline(source, backend);

        builder
            .build()
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            sink.get("clip.mp4").unwrap().detections(),
            &[numeric("PERSON", 0.95)]
        );
    }

    #[tokio::test]
    async fn test_interest_filter_and_ordinal_confidence() {
        let source = InMemoryVideoSource::new().with_blank_video("clip.mp4", 30.0, 61);
        let level = |label: &str, level| Detection::new(label, Confidence::level(level));
        let backend = ScriptedBackend {
            ordinal: true,
            replies: HashMap::from([
                (0, vec![level("person", ConfidenceLevel::Low), level("bicycle", ConfidenceLevel::High)]),
                (60, vec![level("PERSON", ConfidenceLevel::High)]),
            ]),
            ..Default::default()
        };
        let (builder, sink, _) = pipeline(source, backend);
        let pipeline = builder
            .interests(InterestFilter::new(["person"]))
            .build();

        pipeline
            .process_video("clip.mp4", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            sink.get("clip.mp4").unwrap().detections(),
            &[level("PERSON", ConfidenceLevel::High)]
        );
    }

    #[tokio::test]
    async fn test_missing_video_is_a_source_error() {
        let (builder, sink, _) = pipeline(InMemoryVideoSource::new(), ScriptedBackend::default());
        let error = builder
            .build()
            .process_video("ghost.mp4", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error.stage(), "source");
        assert!(sink.results().is_empty());
    }

    #[tokio::test]
    async fn test_from_configuration_uses_configured_backend() {
        let configuration = Configuration::default();
        let pipeline = ProcessingPipeline::from_configuration(
            &configuration,
            Arc::new(InMemoryVideoSource::new()),
            Arc::new(MemorySink::new()),
        )
        .unwrap();
        assert_eq!(pipeline.backend_name(), "cloud-vision");
    }
}
