use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BackendError;
use crate::pipeline::backend::{AnalysisRequest, DetectionBackend};
use crate::pipeline::domain::FrameResult;
use futures::task::Context;
use futures::task::Poll;
use futures::Future;
use tower::Service;
use tracing::warn;

/// Adapts a `DetectionBackend` to a tower `Service`.
///
/// This is the adapter boundary: a per-call timeout is reported as a
/// transient failure, and a malformed response becomes an empty result
/// for the frame instead of an error.
#[derive(Clone)]
pub struct BackendService {
    inner: Arc<dyn DetectionBackend>,
    call_timeout: Option<Duration>,
}

impl BackendService {
    pub fn new(inner: Arc<dyn DetectionBackend>) -> Self {
        Self {
            inner,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.name()
    }
}

impl Service<AnalysisRequest> for BackendService {
    type Response = FrameResult;
    type Error = BackendError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: AnalysisRequest) -> Self::Future {
        let inner = self.inner.clone();
        let call_timeout = self.call_timeout;

        Box::pin(async move {
            let frame_index = req.frame_index();
            let outcome = match call_timeout {
                Some(limit) => match tokio::time::timeout(limit, inner.analyze(&req)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(BackendError::Transient(format!(
                        "no response within {}ms",
                        limit.as_millis()
                    ))),
                },
                None => inner.analyze(&req).await,
            };

            match outcome {
                Err(BackendError::Malformed(reason)) => {
                    warn!(
                        "{} returned an unusable response for frame {}: {}",
                        inner.name(),
                        frame_index,
                        reason
                    );
                    Ok(FrameResult::empty(frame_index))
                }
                other => other,
            }
        })
    }
}
