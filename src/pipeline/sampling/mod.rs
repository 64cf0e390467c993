pub mod frame_sampler;

pub use frame_sampler::{FrameSampler, SampledIndices, SamplingPolicy};
