mod confidence;
mod detection;
mod interest;

pub use confidence::{Confidence, ConfidenceKind, ConfidenceLevel, ParseLevelError};
pub use detection::{canonical_label, Detection, FrameResult};
pub use interest::InterestFilter;
