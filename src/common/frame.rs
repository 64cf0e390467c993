use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;

/// A decoded frame and its position in the video.
#[derive(Clone)]
pub struct Frame {
    index: u64,
    timestamp: Duration,
    image: Arc<DynamicImage>,
}

impl Frame {
    pub fn new(index: u64, frame_rate: f64, image: DynamicImage) -> Self {
        let timestamp = if frame_rate > 0.0 {
            Duration::try_from_secs_f64(index as f64 / frame_rate).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        Self {
            index,
            timestamp,
            image: Arc::new(image),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Derived from the index and frame rate, not read from the container.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .field("width", &width)
            .field("height", &height)
            .finish()
    }
}
