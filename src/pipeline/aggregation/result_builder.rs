use crate::pipeline::domain::Detection;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;

/// Name of the detections array in the output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionsKey {
    Detections,
    DetectedObjects,
}

impl DetectionsKey {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionsKey::Detections => "detections",
            DetectionsKey::DetectedObjects => "detected_objects",
        }
    }
}

/// Final per-video result. Built once by `ResultBuilder`, never mutated after.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResult {
    video_name: String,
    detections: Vec<Detection>,
    description: Option<String>,
}

impl AggregatedResult {
    pub fn video_name(&self) -> &str {
        &self.video_name
    }

    /// Sorted by descending confidence.
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn record(&self, key: DetectionsKey) -> ResultRecord<'_> {
        ResultRecord { result: self, key }
    }

    pub fn to_json_pretty(&self, key: DetectionsKey) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.record(key))
    }
}

/// Serializable view of an `AggregatedResult` with the chosen array key.
pub struct ResultRecord<'a> {
    result: &'a AggregatedResult,
    key: DetectionsKey,
}

impl Serialize for ResultRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.result.description.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("video_name", &self.result.video_name)?;
        map.serialize_entry(self.key.as_str(), &self.result.detections)?;
        if let Some(description) = &self.result.description {
            map.serialize_entry("description", description)?;
        }
        map.end()
    }
}

pub struct ResultBuilder {
    video_name: String,
    detections: Vec<Detection>,
    description: Option<String>,
}

impl ResultBuilder {
    pub fn new(video_name: impl Into<String>) -> Self {
        Self {
            video_name: video_name.into(),
            detections: Vec::new(),
            description: None,
        }
    }

    pub fn detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn build(mut self) -> AggregatedResult {
        // Highest confidence first; equal confidences fall back to label order.
        self.detections.sort_by(|a, b| {
            b.confidence
                .compare(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });
        AggregatedResult {
            video_name: self.video_name,
            detections: self.detections,
            description: self.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::domain::{Confidence, ConfidenceLevel};
    use serde_json::json;

    #[test]
    fn test_numeric_sort_is_descending() {
        let result = ResultBuilder::new("clip.mp4")
            .detections(vec![
                Detection::new("CAT", Confidence::Score(0.8)),
                Detection::new("DOG", Confidence::Score(0.9)),
                Detection::new("BIRD", Confidence::Score(0.1)),
                Detection::new("ANT", Confidence::Score(0.8)),
            ])
            .build();

        let labels: Vec<&str> = result.detections().iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["DOG", "ANT", "CAT", "BIRD"]);
        for pair in result.detections().windows(2) {
            assert!(!pair[1].confidence.is_greater_than(&pair[0].confidence));
        }
    }

    #[test]
    fn test_ordinal_sort_follows_rank() {
        let result = ResultBuilder::new("clip.mp4")
            .detections(vec![
                Detection::new("TREE", Confidence::level(ConfidenceLevel::Low)),
                Detection::new("PERSON", Confidence::level(ConfidenceLevel::High)),
                Detection::new("CAR", Confidence::level(ConfidenceLevel::Medium)),
            ])
            .build();
        let labels: Vec<&str> = result.detections().iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["PERSON", "CAR", "TREE"]);
    }

    #[test]
    fn test_record_uses_selected_key() {
        let result = ResultBuilder::new("clip.mp4")
            .detections(vec![Detection::new("DOG", Confidence::Score(0.9))])
            .build();

        let value = serde_json::to_value(result.record(DetectionsKey::DetectedObjects)).unwrap();
        assert_eq!(
            value,
            json!({
                "video_name": "clip.mp4",
                "detected_objects": [{"object": "DOG", "confidence": 0.9}],
            })
        );
        let value = serde_json::to_value(result.record(DetectionsKey::Detections)).unwrap();
        assert!(value.get("detections").is_some());
        assert!(value.get("description").is_none());
    }

    #[test]
    fn test_record_includes_description_when_present() {
        let result = ResultBuilder::new("clip.mp4")
            .detections(vec![Detection::new(
                "PERSON",
                Confidence::level(ConfidenceLevel::High),
            )])
            .description(Some("A person crossing a street.".to_string()))
            .build();

        let text = result.to_json_pretty(DetectionsKey::Detections).unwrap();
        assert!(text.starts_with("{\n  \"video_name\""));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "video_name": "clip.mp4",
                "detections": [{"object": "PERSON", "confidence": "high"}],
                "description": "A person crossing a street.",
            })
        );
    }
}
