use crate::common::{Frame, VideoHandle};
use crate::error::{FrameReadError, SourceError};
use async_trait::async_trait;

/// Where videos come from.
///
/// `open_video` failures abort the run for that video; `read_frame`
/// failures only skip the frame.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Names of every video the source can open, in a stable order.
    async fn list_videos(&self) -> Result<Vec<String>, SourceError>;

    async fn open_video(&self, name: &str) -> Result<VideoHandle, SourceError>;

    async fn read_frame(&self, handle: &VideoHandle, index: u64) -> Result<Frame, FrameReadError>;
}
