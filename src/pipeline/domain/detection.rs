use super::confidence::Confidence;
use serde::Serialize;

/// Normalized form used to compare labels across frames.
pub fn canonical_label(label: &str) -> String {
    label.trim().to_uppercase()
}

/// A single labeled detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "object")]
    pub label: String,
    pub confidence: Confidence,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    pub fn canonical_label(&self) -> String {
        canonical_label(&self.label)
    }
}

/// Everything a backend reported for one frame (or for a whole video, as frame 0).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameResult {
    pub frame_index: u64,
    pub detections: Vec<Detection>,
    pub description: Option<String>,
}

impl FrameResult {
    pub fn new(frame_index: u64, detections: Vec<Detection>) -> Self {
        Self {
            frame_index,
            detections,
            description: None,
        }
    }

    pub fn empty(frame_index: u64) -> Self {
        Self::new(frame_index, Vec::new())
    }

    pub fn with_detection(mut self, detection: Detection) -> Self {
        self.detections.push(detection);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty() && self.description.is_none()
    }
}
