use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::highlights::RangeLimits;
use crate::pipeline::CutPolicy;

/// Environment variable that overrides `oracle.api_key`
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Highlight oracle (Gemini) settings
    pub oracle: OracleConfig,

    /// Media engine settings
    pub transcoder: TranscoderConfig,

    /// Pipeline limits and policies
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of the Generative Language API
    pub endpoint: String,

    /// Model asked for highlights
    pub model: String,

    /// API key; `GEMINI_API_KEY` takes precedence when set
    pub api_key: Option<String>,

    /// Upper bound for one analysis call
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub ffmpeg_path: String,

    pub ffprobe_path: String,

    /// Bitrate of the MP3 sent to the oracle
    pub audio_bitrate: String,

    pub audio_sample_rate: u32,

    /// x264 preset used when re-encoding clips
    pub video_preset: String,

    pub audio_timeout_secs: u64,

    pub clip_timeout_secs: u64,

    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Longest highlight accepted from the oracle
    pub max_clip_duration_secs: u64,

    /// Most highlights cut from one video
    pub max_ranges: usize,

    /// Clips re-encoded at the same time
    pub max_concurrent_cuts: usize,

    pub cut_policy: CutPolicy,

    /// Largest upload accepted by the front end
    pub max_upload_bytes: u64,

    /// Check ranges against the probed media duration
    pub probe_duration: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-pro".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            audio_bitrate: "128k".to_string(),
            audio_sample_rate: 44100,
            video_preset: "veryfast".to_string(),
            audio_timeout_secs: 120,
            clip_timeout_secs: 120,
            probe_timeout_secs: 30,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_clip_duration_secs: 15 * 60,
            max_ranges: 10,
            max_concurrent_cuts: 3,
            cut_policy: CutPolicy::AllOrNothing,
            max_upload_bytes: 500 * 1024 * 1024,
            probe_duration: true,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key, environment first
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|key| !key.trim().is_empty()))
    }
}

impl TranscoderConfig {
    pub fn audio_timeout(&self) -> Duration {
        Duration::from_secs(self.audio_timeout_secs)
    }

    pub fn clip_timeout(&self) -> Duration {
        Duration::from_secs(self.clip_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl PipelineConfig {
    pub fn range_limits(&self) -> RangeLimits {
        RangeLimits {
            max_clip_duration: Duration::from_secs(self.max_clip_duration_secs),
            max_ranges: self.max_ranges,
            media_duration: None,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load and validate a specific configuration file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)
            .context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&content)
            .context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("highlight-clipper").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let endpoint = Url::parse(&self.oracle.endpoint)
            .with_context(|| format!("Invalid oracle endpoint: {}", self.oracle.endpoint))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!("Oracle endpoint must use HTTP or HTTPS");
        }

        if self.oracle.model.trim().is_empty() {
            anyhow::bail!("Oracle model must be configured");
        }

        let timeouts = [
            ("oracle.timeout_secs", self.oracle.timeout_secs),
            ("transcoder.audio_timeout_secs", self.transcoder.audio_timeout_secs),
            ("transcoder.clip_timeout_secs", self.transcoder.clip_timeout_secs),
            ("transcoder.probe_timeout_secs", self.transcoder.probe_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        if self.pipeline.max_concurrent_cuts == 0 {
            anyhow::bail!("pipeline.max_concurrent_cuts must be at least 1");
        }
        if self.pipeline.max_ranges == 0 {
            anyhow::bail!("pipeline.max_ranges must be at least 1");
        }
        if self.pipeline.max_clip_duration_secs == 0 {
            anyhow::bail!("pipeline.max_clip_duration_secs must be greater than zero");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Oracle Endpoint: {}", self.oracle.endpoint);
        println!("  Oracle Model: {}", self.oracle.model);
        println!(
            "  API Key: {}",
            if self.oracle.resolve_api_key().is_some() { "configured" } else { "missing" }
        );
        println!("  Oracle Timeout: {}s", self.oracle.timeout_secs);
        println!("  ffmpeg: {}", self.transcoder.ffmpeg_path);
        println!("  ffprobe: {}", self.transcoder.ffprobe_path);
        println!("  Clip Timeout: {}s", self.transcoder.clip_timeout_secs);
        println!("  Max Clip Duration: {}s", self.pipeline.max_clip_duration_secs);
        println!("  Concurrent Cuts: {}", self.pipeline.max_concurrent_cuts);
        println!("  Cut Policy: {}", self.pipeline.cut_policy);
        println!(
            "  Max Upload: {}",
            crate::utils::format_file_size(self.pipeline.max_upload_bytes)
        );
    }
}
