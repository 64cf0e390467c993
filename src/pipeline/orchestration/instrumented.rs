use crate::error::BackendError;
use crate::pipeline::backend::AnalysisRequest;
use crate::pipeline::domain::FrameResult;
use futures::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::Service;
use tower_layer::Layer;
use tracing::{debug, debug_span, Instrument};

/// Wraps every backend call in a span and logs its duration and outcome
#[derive(Debug, Clone)]
pub struct CallTimingLayer {
    backend: &'static str,
}

impl CallTimingLayer {
    pub fn new(backend: &'static str) -> Self {
        Self { backend }
    }
}

impl<S> Layer<S> for CallTimingLayer {
    type Service = CallTiming<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallTiming {
            inner,
            backend: self.backend,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallTiming<S> {
    inner: S,
    backend: &'static str,
}

impl<S> Service<AnalysisRequest> for CallTiming<S>
where
    S: Service<AnalysisRequest, Response = FrameResult, Error = BackendError>,
    S::Future: Send + 'static,
{
    type Response = FrameResult;
    type Error = BackendError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: AnalysisRequest) -> Self::Future {
        let frame_index = req.frame_index();
        let backend = self.backend;
        let span = debug_span!("backend_call", backend, frame = frame_index);
        let future = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = future.await;
                let duration_us = start.elapsed().as_micros() as u64;

                match &result {
                    Ok(response) => {
                        debug!(
                            "{} answered frame {} with {} detections in {}us",
                            backend,
                            frame_index,
                            response.detections.len(),
                            duration_us
                        );
                    }
                    Err(e) => {
                        debug!(
                            "{} failed frame {} after {}us: {}",
                            backend, frame_index, duration_us, e
                        );
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}
