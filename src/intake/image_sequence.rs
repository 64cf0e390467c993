use super::video_source::VideoSource;
use crate::common::{Frame, VideoHandle};
use crate::error::{FrameReadError, SourceError};
use async_trait::async_trait;
use image::ImageFormat;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Reads videos that were already decoded to image files.
///
/// Each subdirectory of `root` is one video; its image files, sorted by
/// file name, are the frames. Files the `image` crate does not recognise
/// by extension are ignored.
pub struct ImageSequenceSource {
    root: PathBuf,
    frame_rate: f64,
    location_prefix: Option<String>,
    frames: RwLock<HashMap<String, Arc<Vec<PathBuf>>>>,
}

impl ImageSequenceSource {
    pub fn new(root: impl Into<PathBuf>, frame_rate: f64) -> Self {
        Self {
            root: root.into(),
            frame_rate,
            location_prefix: None,
            frames: RwLock::new(HashMap::new()),
        }
    }

    /// Prefix used to build the location handed to whole-video backends,
    /// e.g. `gs://bucket/videos`. Without one the local directory path is used.
    pub fn with_location_prefix(mut self, prefix: Option<String>) -> Self {
        self.location_prefix = prefix;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn location_of(&self, name: &str, dir: &Path) -> String {
        match &self.location_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), name),
            None => dir.display().to_string(),
        }
    }

    async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
        let io_error = |source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if ImageFormat::from_path(&path).is_err() {
                continue;
            }
            let metadata = tokio::fs::metadata(&path).await.map_err(io_error)?;
            if metadata.is_file() {
                frames.push(path);
            }
        }
        frames.sort();
        Ok(frames)
    }

    async fn frame_paths(&self, name: &str) -> Option<Arc<Vec<PathBuf>>> {
        self.frames.read().await.get(name).cloned()
    }
}

#[async_trait]
impl VideoSource for ImageSequenceSource {
    async fn list_videos(&self) -> Result<Vec<String>, SourceError> {
        let io_error = |source| SourceError::Io {
            path: self.root.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_error)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let is_dir = entry.file_type().await.map_err(io_error)?.is_dir();
            if is_dir {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn open_video(&self, name: &str) -> Result<VideoHandle, SourceError> {
        let dir = self.root.join(name);
        match tokio::fs::metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(SourceError::NotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(name.to_string()))
            }
            Err(source) => return Err(SourceError::Io { path: dir, source }),
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(SourceError::Invalid(
                name.to_string(),
                format!("frame rate must be positive, got {}", self.frame_rate),
            ));
        }

        let frames = Self::list_frames(&dir).await?;
        let total_frames = frames.len() as u64;
        debug!("Opened '{}' with {} frames", name, total_frames);
        self.frames
            .write()
            .await
            .insert(name.to_string(), Arc::new(frames));

        Ok(VideoHandle::new(
            name,
            self.location_of(name, &dir),
            total_frames,
            self.frame_rate,
        ))
    }

    async fn read_frame(&self, handle: &VideoHandle, index: u64) -> Result<Frame, FrameReadError> {
        let paths = self
            .frame_paths(handle.name())
            .await
            .ok_or_else(|| FrameReadError::new(handle.name(), index, "video is not open"))?;
        let path = usize::try_from(index)
            .ok()
            .and_then(|i| paths.get(i))
            .cloned()
            .ok_or_else(|| FrameReadError::new(handle.name(), index, "index out of range"))?;

        let image = tokio::task::spawn_blocking(move || image::open(&path))
            .await
            .map_err(|e| FrameReadError::new(handle.name(), index, e.to_string()))?
            .map_err(|e| FrameReadError::new(handle.name(), index, e.to_string()))?;

        Ok(Frame::new(index, handle.frame_rate(), image))
    }
}
