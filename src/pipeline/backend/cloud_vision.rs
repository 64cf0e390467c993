use super::http::{build_client, encode_frame, send_json, Credentials, RpcStatus};
use super::{unsupported_request, AnalysisRequest, DetectionBackend};
use crate::error::BackendError;
use crate::pipeline::domain::{canonical_label, Confidence, ConfidenceKind, Detection, FrameResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CloudVisionConfig {
    pub endpoint: String,
    pub credentials: Credentials,
    pub max_results: u32,
    pub request_timeout_secs: u64,
}

impl Default for CloudVisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.googleapis.com".to_string(),
            credentials: Credentials::default(),
            max_results: 50,
            request_timeout_secs: 30,
        }
    }
}

/// Per-frame image annotation: object localization plus label detection in one call.
pub struct CloudVisionBackend {
    client: Client,
    config: CloudVisionConfig,
}

impl CloudVisionBackend {
    pub fn new(config: CloudVisionConfig) -> Result<Self, BackendError> {
        let client = build_client(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self { client, config })
    }

    fn annotate_url(&self) -> String {
        format!(
            "{}/v1/images:annotate",
            self.config.endpoint.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl DetectionBackend for CloudVisionBackend {
    fn name(&self) -> &'static str {
        "cloud-vision"
    }

    fn confidence_kind(&self) -> ConfidenceKind {
        ConfidenceKind::Numeric
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<FrameResult, BackendError> {
        let AnalysisRequest::Frame(frame) = request else {
            return Err(unsupported_request(self.name(), request));
        };
        let content = encode_frame(frame).await?;
        let body = json!({
            "requests": [{
                "image": { "content": content },
                "features": [
                    { "type": "OBJECT_LOCALIZATION", "maxResults": self.config.max_results },
                    { "type": "LABEL_DETECTION", "maxResults": self.config.max_results },
                ],
            }]
        });

        let http_request = self
            .config
            .credentials
            .apply(self.client.post(self.annotate_url()))
            .json(&body);
        let response: BatchAnnotateResponse = send_json(http_request).await?;
        let result = frame_result_from_response(frame.index(), response)?;
        debug!(
            "Frame {}: {} labels from image annotation",
            frame.index(),
            result.detections.len()
        );
        Ok(result)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BatchAnnotateResponse {
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AnnotateImageResponse {
    localized_object_annotations: Vec<LocalizedObject>,
    label_annotations: Vec<LabelAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LocalizedObject {
    name: String,
    score: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LabelAnnotation {
    description: String,
    score: f64,
}

// Labels are applied after objects, so a label with the same canonical name wins.
fn frame_result_from_response(
    frame_index: u64,
    response: BatchAnnotateResponse,
) -> Result<FrameResult, BackendError> {
    let Some(response) = response.responses.into_iter().next() else {
        return Err(BackendError::Malformed(
            "annotate response holds no results".to_string(),
        ));
    };
    if let Some(error) = response.error {
        return Err(error.into_error());
    }

    let objects = response
        .localized_object_annotations
        .into_iter()
        .map(|object| (object.name, object.score));
    let labels = response
        .label_annotations
        .into_iter()
        .map(|label| (label.description, label.score));

    let mut merged: IndexMap<String, Detection> = IndexMap::new();
    for (label, score) in objects.chain(labels) {
        let key = canonical_label(&label);
        let Some(confidence) = Confidence::score(score) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        merged.insert(key, Detection::new(label, confidence));
    }

    Ok(FrameResult::new(frame_index, merged.into_values().collect()))
}
