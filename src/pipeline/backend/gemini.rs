use super::http::{build_client, encode_frame, send_json, Credentials};
use super::{unsupported_request, AnalysisRequest, DetectionBackend};
use crate::error::BackendError;
use crate::pipeline::domain::{
    Confidence, ConfidenceKind, ConfidenceLevel, Detection, FrameResult, InterestFilter,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub credentials: Credentials,
    pub model: String,
    /// Replaces the built-in instruction entirely when set.
    pub prompt: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            credentials: Credentials::default(),
            model: "gemini-1.5-flash".to_string(),
            prompt: None,
            request_timeout_secs: 60,
        }
    }
}

/// Per-frame generative annotation: the model is asked for labeled
/// detections with high/medium/low confidence and a short scene description.
pub struct GeminiBackend {
    client: Client,
    config: GeminiConfig,
    prompt: String,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig, interests: &InterestFilter) -> Result<Self, BackendError> {
        let client = build_client(Duration::from_secs(config.request_timeout_secs))?;
        let prompt = config
            .prompt
            .clone()
            .unwrap_or_else(|| build_prompt(interests));
        Ok(Self {
            client,
            config,
            prompt,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl DetectionBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn confidence_kind(&self) -> ConfidenceKind {
        ConfidenceKind::Ordinal
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<FrameResult, BackendError> {
        let AnalysisRequest::Frame(frame) = request else {
            return Err(unsupported_request(self.name(), request));
        };
        let data = encode_frame(frame).await?;
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": self.prompt },
                    { "inline_data": { "mime_type": "image/jpeg", "data": data } },
                ]
            }],
            "generationConfig": { "responseMimeType": "application/json" },
        });

        let http_request = self
            .config
            .credentials
            .apply(self.client.post(self.generate_url()))
            .json(&body);
        let response: GenerateContentResponse = send_json(http_request).await?;
        let text = response.text()?;
        debug!("Raw generative reply for frame {}: {}", frame.index(), text);
        parse_reply(frame.index(), &text)
    }
}

pub(crate) fn build_prompt(interests: &InterestFilter) -> String {
    let mut prompt = String::from(
        "Analyze this image and identify objects, vehicles, buildings, and people.\n",
    );
    if !interests.is_empty() {
        prompt.push_str(&format!(
            "Focus on detecting: {}.\n",
            interests.interests().join(", ")
        ));
    }
    prompt.push_str(
        "Rate the confidence of each detected item as high, medium, or low.\n\
         Respond with JSON only, shaped as \
         {\"detections\": [{\"object\": \"<name>\", \"confidence\": \"high|medium|low\"}], \
         \"description\": \"<one or two sentences describing the scene>\"}.",
    );
    prompt
}

/// Removes a surrounding Markdown code fence (with or without a language tag).
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub(crate) fn parse_reply(frame_index: u64, text: &str) -> Result<FrameResult, BackendError> {
    let body = strip_code_fences(text);
    let reply: GenerativeReply = serde_json::from_str(body)
        .map_err(|e| BackendError::Malformed(format!("reply is not the expected JSON: {e}")))?;

    let (items, description) = match reply {
        GenerativeReply::Record(record) => (record.detections, record.description),
        GenerativeReply::List(items) => (items, None),
    };

    let mut result = FrameResult::empty(frame_index);
    for item in items {
        let level = match &item.confidence {
            serde_json::Value::String(level) => level.parse::<ConfidenceLevel>().ok(),
            _ => None,
        };
        match level {
            Some(level) if !item.object.trim().is_empty() => {
                result
                    .detections
                    .push(Detection::new(item.object, Confidence::level(level)));
            }
            _ => debug!(
                "Skipping reply item '{}' with confidence {}",
                item.object, item.confidence
            ),
        }
    }
    if let Some(description) = description.map(|d| d.trim().to_string()) {
        if !description.is_empty() {
            result.description = Some(description);
        }
    }
    Ok(result)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    fn text(self) -> Result<String, BackendError> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(BackendError::Malformed(
                "generative reply has no text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerativeReply {
    List(Vec<ReplyItem>),
    Record(ReplyRecord),
}

#[derive(Debug, Deserialize)]
struct ReplyRecord {
    #[serde(default, alias = "objects", alias = "detected_objects")]
    detections: Vec<ReplyItem>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyItem {
    #[serde(alias = "label", alias = "name")]
    object: String,
    #[serde(default)]
    confidence: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendErrorKind;
    use crate::pipeline::backend::http::parse_body;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n[1]\n```\n"), "[1]");
        assert_eq!(strip_code_fences("```json{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_record_reply() {
        let text = "```json\n{\"detections\": [\
            {\"object\": \"person\", \"confidence\": \"High\"},\
            {\"object\": \"truck\", \"confidence\": \"low\"}],\
            \"description\": \" A busy loading dock. \"}\n```";
        let result = parse_reply(120, text).unwrap();

        assert_eq!(result.frame_index, 120);
        assert_eq!(
            result.detections,
            vec![
                Detection::new("person", Confidence::level(ConfidenceLevel::High)),
                Detection::new("truck", Confidence::level(ConfidenceLevel::Low)),
            ]
        );
        assert_eq!(result.description.as_deref(), Some("A busy loading dock."));
    }

    #[test]
    fn test_parse_bare_list_reply() {
        let text = r#"[{"object": "building", "confidence": "medium"}]"#;
        let result = parse_reply(0, text).unwrap();
        assert_eq!(result.detections.len(), 1);
        assert_eq!(
            result.detections[0].confidence,
            Confidence::level(ConfidenceLevel::Medium)
        );
        assert!(result.description.is_none());
    }

    #[test]
    fn test_items_with_unusable_confidence_are_skipped() {
        let text = r#"{"detections": [
            {"object": "car", "confidence": 0.9},
            {"object": "dog", "confidence": "certain"},
            {"object": "  ", "confidence": "high"},
            {"label": "tree", "confidence": "low"}
        ]}"#;
        let result = parse_reply(0, text).unwrap();
        assert_eq!(
            result.detections,
            vec![Detection::new("tree", Confidence::level(ConfidenceLevel::Low))]
        );
    }

    #[test]
    fn test_prose_reply_is_malformed() {
        let err = parse_reply(0, "I can see a car and two people.").unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::Malformed);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let body = r#"{"candidates": [{"content": {"role": "model", "parts": [
            {"text": "[{\"object\": \"cat\", "},
            {"text": "\"confidence\": \"high\"}]"}
        ]}}]}"#;
        let response: GenerateContentResponse = parse_body(body).unwrap();
        let text = response.text().unwrap();
        assert_eq!(parse_reply(0, &text).unwrap().detections.len(), 1);

        let empty: GenerateContentResponse = parse_body(r#"{"candidates": []}"#).unwrap();
        assert_eq!(empty.text().unwrap_err().kind(), BackendErrorKind::Malformed);
    }

    #[test]
    fn test_prompt_names_interests() {
        let prompt = build_prompt(&InterestFilter::new(["car", "person"]));
        assert!(prompt.contains("Focus on detecting: CAR, PERSON."));
        assert!(prompt.contains("high, medium, or low"));

        let prompt = build_prompt(&InterestFilter::default());
        assert!(!prompt.contains("Focus on detecting"));
    }
}
