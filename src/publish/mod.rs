pub mod json_file;
pub mod memory;
pub mod result_sink;

pub use json_file::JsonFileSink;
pub use memory::MemorySink;
pub use result_sink::ResultSink;
