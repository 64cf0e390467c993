pub mod cloud_vision;
pub mod factory;
pub mod gemini;
mod http;
pub mod video_intelligence;

use crate::common::{Frame, VideoHandle};
use crate::error::BackendError;
use crate::pipeline::domain::{ConfidenceKind, FrameResult};
use async_trait::async_trait;

pub use cloud_vision::{CloudVisionBackend, CloudVisionConfig};
pub use factory::{BackendConfig, BackendFactory};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use http::Credentials;
pub use video_intelligence::{VideoIntelligenceBackend, VideoIntelligenceConfig};

/// Whether a backend looks at sampled frames or at the whole video at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisScope {
    Frame,
    Video,
}

/// Unit of work handed to a backend.
#[derive(Debug, Clone)]
pub enum AnalysisRequest {
    Frame(Frame),
    Video(VideoHandle),
}

impl AnalysisRequest {
    /// Index the resulting `FrameResult` is reported under; whole-video requests use 0.
    pub fn frame_index(&self) -> u64 {
        match self {
            AnalysisRequest::Frame(frame) => frame.index(),
            AnalysisRequest::Video(_) => 0,
        }
    }
}

/// A detection service that turns a frame (or a video) into labeled detections.
#[async_trait]
pub trait DetectionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn scope(&self) -> AnalysisScope {
        AnalysisScope::Frame
    }

    fn confidence_kind(&self) -> ConfidenceKind;

    /// `Malformed` errors are turned into an empty result by the calling service.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<FrameResult, BackendError>;
}

pub(crate) fn unsupported_request(backend: &str, request: &AnalysisRequest) -> BackendError {
    let what = match request {
        AnalysisRequest::Frame(_) => "single frames",
        AnalysisRequest::Video(_) => "whole videos",
    };
    BackendError::Permanent(format!("{backend} does not analyze {what}"))
}
