use super::result_builder::{AggregatedResult, ResultBuilder};
use crate::pipeline::domain::{Confidence, ConfidenceKind, Detection, FrameResult, InterestFilter};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::warn;

const DESCRIPTION_SEPARATOR: &str = "\n";

/// Merges per-frame results into one detection per canonical label.
///
/// Each label keeps the highest confidence seen across all merged frames;
/// a later detection replaces the kept one only when it is strictly greater,
/// so ties stay with the first one seen. Merging is commutative, so the
/// order in which frames finish does not change the outcome.
pub struct Aggregator {
    kind: ConfidenceKind,
    interests: InterestFilter,
    best: IndexMap<String, Detection>,
    descriptions: BTreeSet<String>,
    frames_merged: usize,
    rejected: usize,
}

impl Aggregator {
    pub fn new(kind: ConfidenceKind) -> Self {
        Self {
            kind,
            interests: InterestFilter::default(),
            best: IndexMap::new(),
            descriptions: BTreeSet::new(),
            frames_merged: 0,
            rejected: 0,
        }
    }

    pub fn with_interests(mut self, interests: InterestFilter) -> Self {
        self.interests = interests;
        self
    }

    pub fn merge(&mut self, result: FrameResult) {
        self.frames_merged += 1;
        for detection in result.detections {
            if detection.confidence.kind() != self.kind {
                warn!(
                    "Dropping '{}' from frame {}: {:?} confidence in a {:?} run",
                    detection.label,
                    result.frame_index,
                    detection.confidence.kind(),
                    self.kind
                );
                self.rejected += 1;
                continue;
            }
            let label = detection.canonical_label();
            if label.is_empty() || !self.interests.matches(&label) {
                continue;
            }
            match self.best.get_mut(&label) {
                Some(best) => {
                    if detection.confidence.is_greater_than(&best.confidence) {
                        best.confidence = detection.confidence;
                    }
                }
                None => {
                    self.best
                        .insert(label.clone(), Detection::new(label, detection.confidence));
                }
            }
        }

        if let Some(description) = result.description {
            let description = description.trim();
            if !description.is_empty() {
                self.descriptions.insert(description.to_string());
            }
        }
    }

    pub fn merge_all<I>(&mut self, results: I)
    where
        I: IntoIterator<Item = FrameResult>,
    {
        for result in results {
            self.merge(result);
        }
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    pub fn frames_merged(&self) -> usize {
        self.frames_merged
    }

    /// Detections dropped because their confidence kind did not match the run.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn confidence_of(&self, label: &str) -> Option<Confidence> {
        self.best
            .get(&crate::pipeline::domain::canonical_label(label))
            .map(|detection| detection.confidence)
    }

    pub fn finish(self, video_name: impl Into<String>) -> AggregatedResult {
        let description = if self.descriptions.is_empty() {
            None
        } else {
            Some(
                self.descriptions
                    .into_iter()
                    .collect::<Vec<_>>()
                    .join(DESCRIPTION_SEPARATOR),
            )
        };
        ResultBuilder::new(video_name)
            .detections(self.best.into_values().collect())
            .description(description)
            .build()
    }
}
