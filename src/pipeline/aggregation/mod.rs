pub mod aggregator;
pub mod result_builder;

pub use aggregator::Aggregator;
pub use result_builder::{AggregatedResult, DetectionsKey, ResultBuilder, ResultRecord};
