use super::video_source::VideoSource;
use crate::common::{Frame, VideoHandle};
use crate::error::{FrameReadError, SourceError};
use async_trait::async_trait;
use image::DynamicImage;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicUsize, Ordering};

struct MemoryVideo {
    frame_rate: f64,
    frames: Vec<Option<DynamicImage>>,
}

/// Videos held in memory. A `None` frame fails to read.
#[derive(Default)]
pub struct InMemoryVideoSource {
    videos: IndexMap<String, MemoryVideo>,
    reads: AtomicUsize,
}

impl InMemoryVideoSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(
        mut self,
        name: impl Into<String>,
        frame_rate: f64,
        frames: Vec<Option<DynamicImage>>,
    ) -> Self {
        self.videos.insert(name.into(), MemoryVideo { frame_rate, frames });
        self
    }

    /// A video of `count` blank frames.
    pub fn with_blank_video(self, name: impl Into<String>, frame_rate: f64, count: usize) -> Self {
        let frames = (0..count)
            .map(|_| Some(DynamicImage::new_rgb8(4, 4)))
            .collect();
        self.with_video(name, frame_rate, frames)
    }

    /// Number of `read_frame` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VideoSource for InMemoryVideoSource {
    async fn list_videos(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.videos.keys().cloned().collect())
    }

    async fn open_video(&self, name: &str) -> Result<VideoHandle, SourceError> {
        let video = self
            .videos
            .get(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        Ok(VideoHandle::new(
            name,
            format!("memory://{name}"),
            video.frames.len() as u64,
            video.frame_rate,
        ))
    }

    async fn read_frame(&self, handle: &VideoHandle, index: u64) -> Result<Frame, FrameReadError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let video = self
            .videos
            .get(handle.name())
            .ok_or_else(|| FrameReadError::new(handle.name(), index, "unknown video"))?;
        let image = usize::try_from(index)
            .ok()
            .and_then(|i| video.frames.get(i))
            .ok_or_else(|| FrameReadError::new(handle.name(), index, "index out of range"))?
            .clone()
            .ok_or_else(|| FrameReadError::new(handle.name(), index, "frame is unreadable"))?;
        Ok(Frame::new(index, video.frame_rate, image))
    }
}
