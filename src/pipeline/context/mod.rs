pub mod metrics;

pub use metrics::RunStats;
