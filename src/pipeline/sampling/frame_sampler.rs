use serde::Deserialize;

/// How far apart sampled frames are.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// Every `step`-th frame, whatever the frame rate.
    FixedStride { step: u64 },
    /// One frame every `seconds` of video, derived from the frame rate.
    TimeStride { seconds: f64 },
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        SamplingPolicy::FixedStride { step: 60 }
    }
}

impl SamplingPolicy {
    /// Index gap between two sampled frames, never below 1.
    pub fn step(&self, frame_rate: f64) -> u64 {
        match *self {
            SamplingPolicy::FixedStride { step } => step.max(1),
            SamplingPolicy::TimeStride { seconds } => {
                let raw = (frame_rate * seconds).round();
                if raw.is_finite() && raw >= 1.0 {
                    raw as u64
                } else {
                    1
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            SamplingPolicy::FixedStride { step } if step == 0 => {
                Err("Sampling step must be greater than 0".to_string())
            }
            SamplingPolicy::TimeStride { seconds } if !(seconds.is_finite() && seconds > 0.0) => {
                Err("Seconds per sample must be a positive number".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Picks which frame indices of a video get analyzed.
#[derive(Debug, Clone, Default)]
pub struct FrameSampler {
    policy: SamplingPolicy,
    max_frames: Option<usize>,
}

impl FrameSampler {
    pub fn new(policy: SamplingPolicy) -> Self {
        Self {
            policy,
            max_frames: None,
        }
    }

    // Caps the number of sampled frames, keeping the earliest ones.
    pub fn with_max_frames(mut self, max_frames: Option<usize>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    /// Lazy sequence of indices in `[0, total_frames)`, strictly increasing from 0.
    /// Call again to restart.
    pub fn sample(&self, total_frames: u64, frame_rate: f64) -> SampledIndices {
        SampledIndices {
            next: 0,
            total: total_frames,
            step: self.policy.step(frame_rate),
            remaining: self.max_frames,
        }
    }

    pub fn expected_count(&self, total_frames: u64, frame_rate: f64) -> u64 {
        let step = self.policy.step(frame_rate);
        let count = total_frames.div_ceil(step);
        match self.max_frames {
            Some(max) => count.min(max as u64),
            None => count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampledIndices {
    next: u64,
    total: u64,
    step: u64,
    remaining: Option<usize>,
}

impl Iterator for SampledIndices {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.next >= self.total || self.remaining == Some(0) {
            return None;
        }
        let index = self.next;
        self.next = self.next.saturating_add(self.step);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = if self.next >= self.total {
            0
        } else {
            (self.total - self.next).div_ceil(self.step) as usize
        };
        let left = match self.remaining {
            Some(remaining) => left.min(remaining),
            None => left,
        };
        (left, Some(left))
    }
}
