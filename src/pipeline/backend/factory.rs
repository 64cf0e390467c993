use super::{
    CloudVisionBackend, CloudVisionConfig, DetectionBackend, GeminiBackend, GeminiConfig,
    VideoIntelligenceBackend, VideoIntelligenceConfig,
};
use crate::error::BackendError;
use crate::pipeline::aggregation::DetectionsKey;
use crate::pipeline::domain::InterestFilter;
use serde::Deserialize;
use std::sync::Arc;

/// Which detection backend to run, with its settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    VideoIntelligence(VideoIntelligenceConfig),
    CloudVision(CloudVisionConfig),
    Gemini(GeminiConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::CloudVision(CloudVisionConfig::default())
    }
}

impl BackendConfig {
    /// Output array key used when the output config does not pick one.
    pub fn default_detections_key(&self) -> DetectionsKey {
        match self {
            BackendConfig::VideoIntelligence(_) => DetectionsKey::DetectedObjects,
            BackendConfig::CloudVision(_) | BackendConfig::Gemini(_) => DetectionsKey::Detections,
        }
    }
}

/// Factory for the configured detection backend
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(
        config: &BackendConfig,
        interests: &InterestFilter,
    ) -> Result<Arc<dyn DetectionBackend>, BackendError> {
        let backend: Arc<dyn DetectionBackend> = match config {
            BackendConfig::VideoIntelligence(config) => {
                Arc::new(VideoIntelligenceBackend::new(config.clone())?)
            }
            BackendConfig::CloudVision(config) => Arc::new(CloudVisionBackend::new(config.clone())?),
            BackendConfig::Gemini(config) => Arc::new(GeminiBackend::new(config.clone(), interests)?),
        };
        tracing::debug!("Created detection backend '{}'", backend.name());
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::AnalysisScope;
    use crate::pipeline::domain::ConfidenceKind;

    #[test]
    fn test_creates_each_variant() {
        let interests = InterestFilter::new(["car"]);

        let backend = BackendFactory::create(&BackendConfig::default(), &interests).unwrap();
        assert_eq!(backend.name(), "cloud-vision");
        assert_eq!(backend.scope(), AnalysisScope::Frame);

        let config = BackendConfig::Gemini(GeminiConfig::default());
        let backend = BackendFactory::create(&config, &interests).unwrap();
        assert_eq!(backend.confidence_kind(), ConfidenceKind::Ordinal);

        let config = BackendConfig::VideoIntelligence(VideoIntelligenceConfig::default());
        let backend = BackendFactory::create(&config, &interests).unwrap();
        assert_eq!(backend.scope(), AnalysisScope::Video);
    }

    #[test]
    fn test_detections_key_defaults_per_variant() {
        assert_eq!(
            BackendConfig::VideoIntelligence(VideoIntelligenceConfig::default())
                .default_detections_key(),
            DetectionsKey::DetectedObjects
        );
        assert_eq!(
            BackendConfig::default().default_detections_key(),
            DetectionsKey::Detections
        );
    }

    #[test]
    fn test_deserializes_tagged_config() {
        let config: BackendConfig =
            serde_json::from_str(r#"{"kind": "gemini", "model": "gemini-1.5-pro"}"#).unwrap();
        match config {
            BackendConfig::Gemini(gemini) => {
                assert_eq!(gemini.model, "gemini-1.5-pro");
                assert_eq!(gemini.request_timeout_secs, 60);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }
}
