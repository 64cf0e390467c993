use std::path::PathBuf;
use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Could not list videos: {0}")]
    Listing(#[source] SourceError),
    #[error("Video source failed for '{video}': {source}")]
    Source {
        video: String,
        #[source]
        source: SourceError,
    },
    #[error("Result sink failed for '{video}': {source}")]
    Sink {
        video: String,
        #[source]
        source: SinkError,
    },
    #[error("Backend Error: {0}")]
    Backend(#[from] BackendError),
    #[error("Video '{video}' was cancelled before its result was written")]
    Cancelled { video: String },
    #[error("{failed} of {total} videos failed")]
    BatchFailed { failed: usize, total: usize },
}

impl AppError {
    /// Name of the stage that produced the error, used in run summaries.
    pub fn stage(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Listing(_) | AppError::Source { .. } => "source",
            AppError::Sink { .. } => "sink",
            AppError::Backend(_) => "backend",
            AppError::Cancelled { .. } => "cancelled",
            AppError::BatchFailed { .. } => "batch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Transient,
    Permanent,
    Malformed,
}

// Detection Backend Error Type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),
    #[error("backend rejected the request: {0}")]
    Permanent(String),
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            BackendError::Transient(_) => BackendErrorKind::Transient,
            BackendError::Permanent(_) => BackendErrorKind::Permanent,
            BackendError::Malformed(_) => BackendErrorKind::Malformed,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == BackendErrorKind::Transient
    }
}

// A single frame could not be decoded. Never fatal to a run.
#[derive(Error, Debug)]
#[error("could not read frame {index} of '{video}': {reason}")]
pub struct FrameReadError {
    pub video: String,
    pub index: u64,
    pub reason: String,
}

impl FrameReadError {
    pub fn new(video: impl Into<String>, index: u64, reason: impl Into<String>) -> Self {
        Self {
            video: video.into(),
            index,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("video '{0}' not found")]
    NotFound(String),
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("video '{0}' is not usable: {1}")]
    Invalid(String, String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
