use crate::error::FrameReadError;
use crate::pipeline::backend::AnalysisRequest;
use crate::pipeline::context::metrics::RunStats;
use crate::pipeline::domain::FrameResult;
use futures::{Future, Stream, StreamExt};
use std::time::Instant;
use tokio::time::Instant as Deadline;
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Service, ServiceExt};
use tracing::{debug, info, warn};

/// Results that made it back before the run finished or was cut short.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    pub results: Vec<FrameResult>,
    pub stats: RunStats,
}

enum FrameOutcome {
    Analyzed(FrameResult),
    Failed(u64, BoxError),
    Unreadable(FrameReadError),
}

/// Dispatches frames to the analysis service with at most `workers` in flight.
///
/// Jobs are futures that produce a request (usually by decoding a frame), so
/// frames are only read once a slot is free. With one worker the frames run
/// strictly one after another.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyScheduler {
    workers: usize,
}

impl Default for ConcurrencyScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

impl ConcurrencyScheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn sequential() -> Self {
        Self::new(1)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every job to completion, or until `deadline` passes or `cancel` fires.
    ///
    /// Stopping early drops whatever is still in flight; the results gathered
    /// so far are returned either way.
    pub async fn run<S, J, F>(
        &self,
        service: S,
        jobs: J,
        deadline: Option<Deadline>,
        cancel: &CancellationToken,
    ) -> ScheduleOutcome
    where
        S: Service<AnalysisRequest, Response = FrameResult> + Clone + Send + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send,
        J: Stream<Item = F> + Send,
        F: Future<Output = Result<AnalysisRequest, FrameReadError>> + Send,
    {
        let start = Instant::now();
        let mut outcome = ScheduleOutcome::default();

        let tasks = jobs
            .map(|job| {
                let service = service.clone();
                async move {
                    let request = match job.await {
                        Ok(request) => request,
                        Err(error) => return FrameOutcome::Unreadable(error),
                    };
                    let frame_index = request.frame_index();
                    match service.oneshot(request).await {
                        Ok(result) => FrameOutcome::Analyzed(result),
                        Err(error) => FrameOutcome::Failed(frame_index, error.into()),
                    }
                }
            })
            .buffer_unordered(self.workers);
        tokio::pin!(tasks);

        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Run cancelled with {} frames analyzed", outcome.stats.analyzed);
                    outcome.stats.record_cancel();
                    break;
                }
                _ = &mut expiry => {
                    warn!(
                        "Deadline expired, keeping {} analyzed frames",
                        outcome.stats.analyzed
                    );
                    outcome.stats.record_deadline();
                    break;
                }
                next = tasks.next() => match next {
                    Some(FrameOutcome::Analyzed(result)) => {
                        debug!(
                            "Frame {} analyzed with {} detections",
                            result.frame_index,
                            result.detections.len()
                        );
                        outcome.stats.record_analyzed();
                        outcome.results.push(result);
                    }
                    Some(FrameOutcome::Failed(frame_index, error)) => {
                        warn!("Frame {} contributes nothing: {}", frame_index, error);
                        outcome.stats.record_failed();
                    }
                    Some(FrameOutcome::Unreadable(error)) => {
                        warn!("Skipping frame: {}", error);
                        outcome.stats.record_unreadable();
                    }
                    None => break,
                },
            }
        }

        outcome.stats.finalize(start);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Frame;
    use crate::error::BackendError;
    use futures::future::{self, BoxFuture, Ready};
    use futures::stream;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::service_fn;

    fn frame_jobs(
        indices: Vec<u64>,
    ) -> impl Stream<Item = Ready<Result<AnalysisRequest, FrameReadError>>> + Send {
        stream::iter(indices).map(|index| {
            future::ready(Ok(AnalysisRequest::Frame(Frame::new(
                index,
                30.0,
                DynamicImage::new_rgb8(2, 2),
            ))))
        })
    }

    /// Frame 0 hangs for an hour; every other frame answers straight away.
    #[derive(Clone, Default)]
    struct StallingService {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Service<AnalysisRequest> for StallingService {
        type Response = FrameResult;
        type Error = BackendError;
        type Future = BoxFuture<'static, Result<FrameResult, BackendError>>;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: AnalysisRequest) -> Self::Future {
            let in_flight = self.in_flight.clone();
            let peak = self.peak.clone();
            Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if req.frame_index() == 0 {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                } else {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(FrameResult::empty(req.frame_index()))
            })
        }
    }

    #[tokio::test]
    async fn test_sequential_runs_one_at_a_time() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let service = service_fn({
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            move |req: AnalysisRequest| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, BackendError>(FrameResult::empty(req.frame_index()))
                }
            }
        });

        let outcome = ConcurrencyScheduler::sequential()
            .run(
                service,
                frame_jobs(vec![0, 60, 120, 180]),
                None,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.results.len(), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        let indices: Vec<u64> = outcome.results.iter().map(|r| r.frame_index).collect();
        assert_eq!(indices, vec![0, 60, 120, 180]);
        assert!(outcome.stats.is_complete());
    }

    #[tokio::test]
    async fn test_stalled_frame_does_not_block_other_slots() {
        let service = StallingService::default();
        let peak = service.peak.clone();

        let deadline = Deadline::now() + Duration::from_millis(500);
        let outcome = ConcurrencyScheduler::new(3)
            .run(
                service,
                frame_jobs(vec![0, 60, 120, 180, 240, 300]),
                Some(deadline),
                &CancellationToken::new(),
            )
            .await;

        let mut indices: Vec<u64> = outcome.results.iter().map(|r| r.frame_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![60, 120, 180, 240, 300]);
        assert!(outcome.stats.deadline_expired);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_failed_and_unreadable_frames_are_counted() {
        let service = service_fn(|req: AnalysisRequest| async move {
            if req.frame_index() == 60 {
                Err(BackendError::Permanent("HTTP 400".to_string()))
            } else {
                Ok(FrameResult::empty(req.frame_index()))
            }
        });
        let jobs = stream::iter(vec![0u64, 60, 120]).map(|index| {
            future::ready(if index == 120 {
                Err(FrameReadError::new("clip", index, "truncated"))
            } else {
                Ok(AnalysisRequest::Frame(Frame::new(
                    index,
                    30.0,
                    DynamicImage::new_rgb8(2, 2),
                )))
            })
        });

        let outcome = ConcurrencyScheduler::new(2)
            .run(service, jobs, None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.stats.analyzed, 1);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.unreadable, 1);
        assert!(outcome.stats.is_complete());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let service = StallingService::default();

        let outcome = ConcurrencyScheduler::new(2)
            .run(service, frame_jobs(vec![0, 60]), None, &cancel)
            .await;

        assert!(outcome.results.is_empty());
        assert!(outcome.stats.cancelled);
        assert!(!outcome.stats.deadline_expired);
    }

    #[tokio::test]
    async fn test_no_jobs_completes_empty() {
        let service = service_fn(|req: AnalysisRequest| async move {
            Ok::<_, BackendError>(FrameResult::empty(req.frame_index()))
        });
        let outcome = ConcurrencyScheduler::default()
            .run(service, frame_jobs(Vec::new()), None, &CancellationToken::new())
            .await;
        assert!(outcome.results.is_empty());
        assert!(outcome.stats.is_complete());
    }
}
