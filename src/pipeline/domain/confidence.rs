use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Ordinal confidence reported by generative backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn rank(self) -> u8 {
        match self {
            ConfidenceLevel::Low => 0,
            ConfidenceLevel::Medium => 1,
            ConfidenceLevel::High => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown confidence level '{0}'")]
pub struct ParseLevelError(String);

impl FromStr for ConfidenceLevel {
    type Err = ParseLevelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ConfidenceLevel::Low),
            "medium" => Ok(ConfidenceLevel::Medium),
            "high" => Ok(ConfidenceLevel::High),
            _ => Err(ParseLevelError(value.to_string())),
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which representation a backend reports. One run never mixes the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceKind {
    Numeric,
    Ordinal,
}

/// A confidence value, either a score in `[0.0, 1.0]` or an ordinal level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Confidence {
    Score(f64),
    Level(ConfidenceLevel),
}

impl Confidence {
    /// Builds a numeric confidence, clamping into `[0.0, 1.0]`. NaN is rejected.
    pub fn score(value: f64) -> Option<Self> {
        if value.is_nan() {
            return None;
        }
        Some(Confidence::Score(value.clamp(0.0, 1.0)))
    }

    pub fn level(level: ConfidenceLevel) -> Self {
        Confidence::Level(level)
    }

    pub fn kind(&self) -> ConfidenceKind {
        match self {
            Confidence::Score(_) => ConfidenceKind::Numeric,
            Confidence::Level(_) => ConfidenceKind::Ordinal,
        }
    }

    /// Compares two confidences of the same kind. Returns `None` across kinds.
    pub fn compare(&self, other: &Confidence) -> Option<Ordering> {
        match (self, other) {
            (Confidence::Score(a), Confidence::Score(b)) => a.partial_cmp(b),
            (Confidence::Level(a), Confidence::Level(b)) => Some(a.rank().cmp(&b.rank())),
            _ => None,
        }
    }

    pub fn is_greater_than(&self, other: &Confidence) -> bool {
        self.compare(other) == Some(Ordering::Greater)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Score(score) => write!(f, "{score:.3}"),
            Confidence::Level(level) => write!(f, "{level}"),
        }
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Confidence::Score(score) => serializer.serialize_f64(*score),
            Confidence::Level(level) => serializer.serialize_str(level.as_str()),
        }
    }
}
