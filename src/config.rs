use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SubburnError};
use crate::quota::OwnerLimits;

/// Default config file looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "subburn.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub media: MediaConfig,
    pub transcriber: TranscriberConfig,
    pub dispatcher: DispatcherConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding uploads, subtitle files and burned outputs
    pub upload_dir: PathBuf,
    /// Directory holding job records, the usage ledger and the task spool
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    /// x264 preset used when burning subtitles
    pub preset: String,
    /// Encoder thread count; kept low for shared workers
    pub threads: u32,
    /// Extension of the scratch audio file, selects the audio codec
    pub audio_extension: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriberBackend {
    /// Local `whisper` command-line tool
    WhisperCli,
    /// OpenAI-compatible HTTP transcription endpoint
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    pub backend: TranscriberBackend,
    /// Path to the whisper binary (whisper_cli backend)
    pub binary_path: String,
    /// Model name
    pub model: String,
    /// Beam size passed to the decoder
    pub beam_size: u32,
    /// Base URL of the remote endpoint (remote backend)
    pub endpoint: String,
    /// Environment variable holding the remote API key
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of concurrent workers in this process
    pub workers: usize,
    /// Wall-clock budget of a single unit of work
    pub job_timeout_secs: u64,
    /// Sleep between polls of an empty queue
    pub poll_interval_ms: u64,
    /// Deliveries of one unit before it is abandoned
    pub max_attempts: u32,
    /// Interval between scans for abandoned units
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_duration_minutes: u32,
    /// `None` means unlimited
    pub max_daily_tries: Option<u32>,
    /// Per-owner limits supplied by the identity service
    pub overrides: HashMap<String, OwnerLimits>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            state_dir: PathBuf::from(".subburn"),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            preset: "ultrafast".to_string(),
            threads: 1,
            audio_extension: "mp3".to_string(),
        }
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            backend: TranscriberBackend::WhisperCli,
            binary_path: "whisper".to_string(),
            model: "base".to_string(),
            beam_size: 5,
            endpoint: "http://localhost:8000".to_string(),
            api_key_env: None,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            job_timeout_secs: 3600,
            poll_interval_ms: 500,
            max_attempts: 2,
            reap_interval_secs: 60,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_duration_minutes: 5,
            max_daily_tries: Some(5),
            overrides: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".subburn").join("log"),
        }
    }
}

impl DispatcherConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl LimitsConfig {
    /// Limits for an owner, falling back to the default tier
    pub fn for_owner(&self, owner: &str) -> OwnerLimits {
        self.overrides.get(owner).copied().unwrap_or(OwnerLimits {
            max_duration_minutes: self.max_duration_minutes,
            max_daily_tries: self.max_daily_tries,
        })
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubburnError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SubburnError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubburnError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubburnError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load the explicit file, else `subburn.toml` in the current directory, else defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("UPLOAD_FOLDER") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SUBBURN_STATE_DIR") {
            self.storage.state_dir = PathBuf::from(dir);
        }
    }
}
