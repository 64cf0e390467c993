pub mod backend_service;

pub use backend_service::BackendService;
