pub mod image_sequence;
pub mod memory;
pub mod video_source;

pub use image_sequence::ImageSequenceSource;
pub use memory::InMemoryVideoSource;
pub use video_source::VideoSource;
