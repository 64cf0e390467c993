pub mod aggregation;
pub mod backend;
pub mod context;
pub mod domain;
pub mod orchestration;
pub mod sampling;
