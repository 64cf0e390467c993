use super::detection::{canonical_label, FrameResult};

/// Keeps only labels related to a configured set of interests.
///
/// A label matches when it contains an interest or an interest contains it
/// (case-insensitive), so both "RED CAR" and "VEHICLE" style answers count
/// as hits for an interest like "CAR". An empty set keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestFilter {
    interests: Vec<String>,
}

impl InterestFilter {
    pub fn new<I, S>(interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut canonical: Vec<String> = Vec::new();
        for interest in interests {
            let interest = canonical_label(interest.as_ref());
            if !interest.is_empty() && !canonical.contains(&interest) {
                canonical.push(interest);
            }
        }
        Self {
            interests: canonical,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }

    pub fn interests(&self) -> &[String] {
        &self.interests
    }

    pub fn matches(&self, label: &str) -> bool {
        if self.interests.is_empty() {
            return true;
        }
        let label = canonical_label(label);
        if label.is_empty() {
            return false;
        }
        self.interests
            .iter()
            .any(|interest| label.contains(interest.as_str()) || interest.contains(label.as_str()))
    }

    /// Drops the detections of `result` that do not match.
    pub fn retain(&self, result: &mut FrameResult) {
        if self.is_empty() {
            return;
        }
        result
            .detections
            .retain(|detection| self.matches(&detection.label));
    }
}
