use crate::error::BackendError;
use crate::pipeline::backend::AnalysisRequest;
use crate::pipeline::domain::FrameResult;
use rand::Rng;
use std::time::Duration;
use tokio::time::Sleep;
use tower::retry::Policy;
use tracing::warn;

/// Retries transient backend failures with exponential backoff.
///
/// `max_attempts` counts every call including the first one. tower clones
/// the policy for each request, so the attempt counter is per frame. Once
/// the attempts are used up the last transient error is rewritten as a
/// permanent one, which makes the frame contribute nothing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    jitter: bool,
    attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(10))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            jitter: true,
            attempts: 0,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the call following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let delay = self
            .initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff);
        if self.jitter {
            delay.mul_f64(rand::rng().random_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

impl Policy<AnalysisRequest, FrameResult, BackendError> for RetryPolicy {
    type Future = Sleep;

    fn retry(
        &mut self,
        req: &mut AnalysisRequest,
        result: &mut Result<FrameResult, BackendError>,
    ) -> Option<Self::Future> {
        self.attempts += 1;
        let error = match result {
            Ok(_) => return None,
            Err(error) if !error.is_transient() => return None,
            Err(error) => error,
        };

        if self.attempts >= self.max_attempts {
            warn!(
                "Giving up on frame {} after {} attempts: {}",
                req.frame_index(),
                self.attempts,
                error
            );
            *error = BackendError::Permanent(format!(
                "retries exhausted after {} attempts: {}",
                self.attempts, error
            ));
            return None;
        }

        let delay = self.backoff(self.attempts);
        warn!(
            "Attempt {}/{} for frame {} failed ({}), retrying in {}ms",
            self.attempts,
            self.max_attempts,
            req.frame_index(),
            error,
            delay.as_millis()
        );
        Some(tokio::time::sleep(delay))
    }

    fn clone_request(&mut self, req: &AnalysisRequest) -> Option<AnalysisRequest> {
        Some(req.clone())
    }
}
