/// Reference to a decodable video, handed out by a `VideoSource`.
///
/// `location` is what video-level backends receive (for example a
/// `gs://bucket/name.mp4` URI); per-frame backends never look at it.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoHandle {
    name: String,
    location: String,
    total_frames: u64,
    frame_rate: f64,
}

impl VideoHandle {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        total_frames: u64,
        frame_rate: f64,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            total_frames,
            frame_rate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }
}
