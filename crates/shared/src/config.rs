//! Configuration management for the comment relay.
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all settings. Credentials never live in the
//! file; see [`ApiCredentials::from_env`].

use crate::models::Sensitivity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory settings
    pub data: DataConfig,

    /// Database settings
    pub database: DatabaseConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// External decoder binaries
    #[serde(default)]
    pub decoder: DecoderConfig,

    /// Frame extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Frame matching thresholds
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Comment transfer settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Asset API settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// Data directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root data directory path
    pub root_dir: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path (relative to data directory or absolute)
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory path (relative to data directory or absolute)
    pub log_dir: String,

    /// Default log level (trace, debug, info, warn, error)
    pub default_level: String,

    /// Enable console output
    pub console: bool,

    /// Enable file output
    pub file: bool,

    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

/// Paths of the external decode tools.
///
/// Resolved once at startup and injected into the decoder; nothing searches
/// `PATH` at call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// ffmpeg binary
    pub ffmpeg_path: String,

    /// ffprobe binary
    pub ffprobe_path: String,
}

/// Frame extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Maximum simultaneous decode subprocesses
    pub concurrency: usize,

    /// Sparse requests longer than this are split into sequential chunks
    pub chunk_threshold: usize,

    /// Sampling stride for the full target pool (1 = every frame)
    pub decimation_factor: u64,

    /// Half-width of the target window decoded around refinement candidates
    pub refinement_window_seconds: f64,

    /// Windows closer than this are merged into one decode
    pub merge_gap_seconds: f64,

    /// Frames hashed together when draining the decode queue
    pub hash_batch_size: usize,

    /// Maximum frames hashed in parallel
    pub hash_concurrency: usize,

    /// Undigested frames allowed in flight between decoder and hasher
    pub queue_capacity: usize,
}

/// Frame matching configuration (bit distances out of 64)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// At or below this distance a clear match is high confidence
    pub strict_distance: u32,

    /// Above this distance there is no plausible match
    pub loose_distance: u32,

    /// Runner-up closer than this to the best is a near-tie
    pub tie_gap: u32,

    /// Adjacent pool samples within this distance of each other are one shot
    pub run_distance: u32,

    /// Shots closer in time than this count as the same candidate
    pub distinct_gap_seconds: f64,

    /// Candidates kept from the coarse pass for refinement
    pub retained_candidates: usize,

    /// Source frame offsets sampled during refinement
    pub refinement_offsets: Vec<i64>,
}

/// Comment transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Create-comment calls per batch
    pub batch_size: usize,

    /// Pause between batches in seconds
    pub batch_delay_seconds: u64,

    /// Prefix relocated comments with a transfer marker
    pub add_prefix: bool,

    /// Tier used when the job does not name one
    pub default_sensitivity: Sensitivity,

    /// Similarity floor for each sensitivity tier
    pub floors: SensitivityFloors,
}

/// Similarity floors per sensitivity tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityFloors {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

/// Asset API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Maximum retries for failed reads
    pub max_retries: u32,

    /// Retry delay in milliseconds (doubled per attempt)
    pub retry_delay_ms: u64,

    /// User agent sent with every request
    pub user_agent: String,
}

/// Tokens supplied through the environment
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl ApiCredentials {
    pub const ACCESS_TOKEN_VAR: &'static str = "RELAY_ACCESS_TOKEN";
    pub const REFRESH_TOKEN_VAR: &'static str = "RELAY_REFRESH_TOKEN";

    /// Read credentials from `RELAY_ACCESS_TOKEN` / `RELAY_REFRESH_TOKEN`
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var(Self::ACCESS_TOKEN_VAR)
            .with_context(|| format!("{} is not set", Self::ACCESS_TOKEN_VAR))?;
        let refresh_token = std::env::var(Self::REFRESH_TOKEN_VAR).ok();

        Ok(Self {
            access_token,
            refresh_token,
        })
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            chunk_threshold: 100,
            decimation_factor: 2,
            refinement_window_seconds: 1.0,
            merge_gap_seconds: 3.0,
            hash_batch_size: 10,
            hash_concurrency: 4,
            queue_capacity: 32,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            strict_distance: 10,
            loose_distance: 20,
            tie_gap: 3,
            run_distance: 4,
            distinct_gap_seconds: 1.0,
            retained_candidates: 5,
            refinement_offsets: vec![-5, -1, 0, 1, 5],
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_seconds: 60,
            add_prefix: true,
            default_sensitivity: Sensitivity::Medium,
            floors: SensitivityFloors::default(),
        }
    }
}

impl Default for SensitivityFloors {
    fn default() -> Self {
        Self {
            high: 0.85,
            medium: 0.70,
            low: 0.55,
        }
    }
}

impl SensitivityFloors {
    /// Minimum similarity a match needs to be transferred under `tier`
    pub fn floor(&self, tier: Sensitivity) -> f64 {
        match tier {
            Sensitivity::High => self.high,
            Sensitivity::Medium => self.medium,
            Sensitivity::Low => self.low,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.frame.io/v2".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_ms: 1000,
            user_agent: "comment-relay/0.1.0".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                root_dir: "data".to_string(),
            },
            database: DatabaseConfig {
                path: "jobs.db".to_string(),
            },
            logging: LoggingConfig {
                log_dir: "logs".to_string(),
                default_level: "info".to_string(),
                console: true,
                file: true,
                json_format: false,
            },
            decoder: DecoderConfig::default(),
            extraction: ExtractionConfig::default(),
            matching: MatchingConfig::default(),
            transfer: TransferConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration saved successfully"
        );

        Ok(())
    }

    /// Get the absolute path for the data directory
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.root_dir)
    }

    /// Get the absolute path for the database file
    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.database.path)
    }

    /// Get the absolute path for the log directory
    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.logging.log_dir)
    }

    /// Pause between transfer batches
    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.transfer.batch_delay_seconds)
    }

    fn resolve(&self, configured: &str) -> PathBuf {
        let path = Path::new(configured);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }
}
