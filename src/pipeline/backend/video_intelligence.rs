use super::http::{build_client, send_json, Credentials, RpcStatus};
use super::{unsupported_request, AnalysisRequest, AnalysisScope, DetectionBackend};
use crate::common::VideoHandle;
use crate::error::BackendError;
use crate::pipeline::domain::{Confidence, ConfidenceKind, Detection, FrameResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VideoIntelligenceConfig {
    pub endpoint: String,
    pub credentials: Credentials,
    pub location_id: Option<String>,
    /// Also request segment labels on top of object tracking.
    pub label_detection: bool,
    pub poll_interval_secs: u64,
    pub operation_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for VideoIntelligenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://videointelligence.googleapis.com".to_string(),
            credentials: Credentials::default(),
            location_id: None,
            label_detection: true,
            poll_interval_secs: 5,
            operation_timeout_secs: 300,
            request_timeout_secs: 60,
        }
    }
}

/// Whole-video annotation. The backend tracks objects across the timeline
/// itself, so the video is submitted once and the annotations come back as a
/// single synthetic frame result.
pub struct VideoIntelligenceBackend {
    client: Client,
    config: VideoIntelligenceConfig,
}

impl VideoIntelligenceBackend {
    pub fn new(config: VideoIntelligenceConfig) -> Result<Self, BackendError> {
        let client = build_client(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    fn features(&self) -> Vec<&'static str> {
        let mut features = vec!["OBJECT_TRACKING"];
        if self.config.label_detection {
            features.push("LABEL_DETECTION");
        }
        features
    }

    async fn submit(&self, video: &VideoHandle) -> Result<Operation, BackendError> {
        let mut body = json!({
            "inputUri": video.location(),
            "features": self.features(),
        });
        if let Some(location_id) = &self.config.location_id {
            body["locationId"] = json!(location_id);
        }
        let request = self
            .config
            .credentials
            .apply(self.client.post(format!("{}/v1/videos:annotate", self.base_url())))
            .json(&body);
        send_json(request).await
    }

    async fn poll(&self, name: &str) -> Result<Operation, BackendError> {
        let request = self
            .config
            .credentials
            .apply(self.client.get(format!("{}/v1/{}", self.base_url(), name)));
        send_json(request).await
    }

    async fn wait_for(&self, mut operation: Operation) -> Result<Operation, BackendError> {
        let timeout = Duration::from_secs(self.config.operation_timeout_secs);
        let deadline = Instant::now() + timeout;
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        while !operation.done {
            if operation.name.is_empty() {
                return Err(BackendError::Malformed(
                    "pending operation has no name to poll".to_string(),
                ));
            }
            if Instant::now() + interval > deadline {
                return Err(BackendError::Permanent(format!(
                    "operation {} did not finish within {}s",
                    operation.name,
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(interval).await;
            debug!("Polling annotation operation {}", operation.name);
            operation = self.poll(&operation.name).await?;
        }
        Ok(operation)
    }
}

#[async_trait]
impl DetectionBackend for VideoIntelligenceBackend {
    fn name(&self) -> &'static str {
        "video-intelligence"
    }

    fn scope(&self) -> AnalysisScope {
        AnalysisScope::Video
    }

    fn confidence_kind(&self) -> ConfidenceKind {
        ConfidenceKind::Numeric
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<FrameResult, BackendError> {
        let AnalysisRequest::Video(video) = request else {
            return Err(unsupported_request(self.name(), request));
        };
        info!("Submitting {} for video annotation", video.location());
        let operation = self.submit(video).await?;
        let operation = self.wait_for(operation).await?;
        let result = frame_result_from_operation(operation)?;
        info!(
            "Video annotation of {} returned {} annotations",
            video.name(),
            result.detections.len()
        );
        Ok(result)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Operation {
    name: String,
    done: bool,
    error: Option<RpcStatus>,
    response: Option<AnnotateVideoResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AnnotateVideoResponse {
    annotation_results: Vec<VideoAnnotationResults>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VideoAnnotationResults {
    object_annotations: Vec<ObjectTrackingAnnotation>,
    segment_label_annotations: Vec<LabelAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Entity {
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectTrackingAnnotation {
    entity: Entity,
    confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LabelAnnotation {
    entity: Entity,
    segments: Vec<LabelSegment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LabelSegment {
    confidence: f64,
}

fn frame_result_from_operation(operation: Operation) -> Result<FrameResult, BackendError> {
    if let Some(error) = operation.error {
        return Err(error.into_error());
    }
    let Some(response) = operation.response else {
        return Err(BackendError::Malformed(format!(
            "operation {} finished without a response",
            operation.name
        )));
    };
    let Some(results) = response.annotation_results.into_iter().next() else {
        return Err(BackendError::Malformed(
            "video annotation returned no results".to_string(),
        ));
    };
    if let Some(error) = results.error {
        return Err(error.into_error());
    }

    let objects = results
        .object_annotations
        .into_iter()
        .map(|annotation| (annotation.entity.description, annotation.confidence));
    // Segment labels are scored by their first segment.
    let labels = results
        .segment_label_annotations
        .into_iter()
        .filter_map(|label| {
            let confidence = label.segments.first()?.confidence;
            Some((label.entity.description, confidence))
        });

    let detections = objects
        .chain(labels)
        .filter(|(label, _)| !label.trim().is_empty())
        .filter_map(|(label, score)| Confidence::score(score).map(|c| Detection::new(label, c)))
        .collect();

    Ok(FrameResult::new(0, detections))
}
