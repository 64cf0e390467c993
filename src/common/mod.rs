pub mod frame;
pub mod video;

pub use frame::Frame;
pub use video::VideoHandle;
