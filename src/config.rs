use crate::error::ConfigError;
use crate::pipeline::aggregation::DetectionsKey;
use crate::pipeline::backend::BackendConfig;
use crate::pipeline::orchestration::RetryPolicy;
use crate::pipeline::sampling::{FrameSampler, SamplingPolicy};
use config::{Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

const ENV_PREFIX: &str = "VIDTAG";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub log_level: String,
    pub source: SourceSettings,
    pub output: OutputSettings,
    pub sampling: SamplingSettings,
    pub scheduler: SchedulerSettings,
    pub retry: RetrySettings,
    pub backend: BackendConfig,
    /// Labels to keep; empty keeps everything.
    pub interests: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            source: SourceSettings::default(),
            output: OutputSettings::default(),
            sampling: SamplingSettings::default(),
            scheduler: SchedulerSettings::default(),
            retry: RetrySettings::default(),
            backend: BackendConfig::default(),
            interests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Directory holding one subdirectory of frame images per video.
    pub root: PathBuf,
    pub frame_rate: f64,
    /// Prefix for the location handed to whole-video backends (e.g. `gs://bucket/videos`).
    pub location_prefix: Option<String>,
    /// Only videos whose name ends with this suffix are processed.
    pub suffix: Option<String>,
    /// Exact video names to process instead of listing the root.
    pub videos: Vec<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("videos"),
            frame_rate: 30.0,
            location_prefix: None,
            suffix: None,
            videos: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
    /// Defaults per backend when unset.
    pub detections_key: Option<DetectionsKey>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
            detections_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub policy: SamplingPolicy,
    pub max_frames: Option<usize>,
}

impl SamplingSettings {
    pub fn sampler(&self) -> FrameSampler {
        FrameSampler::new(self.policy).with_max_frames(self.max_frames)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub workers: usize,
    /// Limit on a single backend call; a timeout counts as a transient failure.
    pub call_timeout_secs: Option<u64>,
    /// Limit on one frame including retries.
    pub frame_timeout_secs: Option<u64>,
    /// Per-video deadline; frames still in flight when it passes are dropped.
    pub video_timeout_secs: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            call_timeout_secs: None,
            frame_timeout_secs: None,
            video_timeout_secs: None,
        }
    }
}

impl SchedulerSettings {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_secs.map(Duration::from_secs)
    }

    pub fn video_timeout(&self) -> Option<Duration> {
        self.video_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
        .with_jitter(self.jitter)
    }
}

impl Configuration {
    /// Defaults, then the TOML file at `path` if given, then `VIDTAG__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let configuration: Configuration = builder
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let configuration: Configuration = config::Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("interests")
            .with_list_parse_key("source.videos")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log_level()?;
        self.sampling
            .policy
            .validate()
            .map_err(ConfigError::Invalid)?;
        if self.sampling.max_frames == Some(0) {
            return Err(ConfigError::Invalid(
                "sampling.max_frames must be at least 1".to_string(),
            ));
        }
        if self.scheduler.workers == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.workers must be at least 1".to_string(),
            ));
        }
        let timeouts = [
            ("scheduler.call_timeout_secs", self.scheduler.call_timeout_secs),
            ("scheduler.frame_timeout_secs", self.scheduler.frame_timeout_secs),
            ("scheduler.video_timeout_secs", self.scheduler.video_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string(),
            ));
        }
        if !(self.source.frame_rate.is_finite() && self.source.frame_rate > 0.0) {
            return Err(ConfigError::Invalid(
                "source.frame_rate must be positive".to_string(),
            ));
        }
        if self.source.videos.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "source.videos must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)))
    }

    pub fn detections_key(&self) -> DetectionsKey {
        self.output
            .detections_key
            .unwrap_or_else(|| self.backend.default_detections_key())
    }
}
