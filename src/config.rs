//! Recorder configuration
//!
//! All tunables live in a single struct loaded from a TOML file and
//! validated once at startup. Missing fields fall back to defaults that
//! match a small always-on camera deployment.

use crate::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Source connection URI (e.g. an rtsp:// camera URL). Required.
    #[serde(default)]
    pub source_url: String,

    /// Directory where finished segments are stored
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Length of one segment in seconds
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u64,

    /// Maximum number of finished segments kept on disk
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    /// Capture frame rate
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Output frame width in pixels
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,

    /// Output frame height in pixels
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,

    /// Consecutive read misses tolerated before forcing a reconnect
    #[serde(default = "default_reconnect_threshold")]
    pub reconnect_threshold: u32,

    /// Backoff after a single read miss, in milliseconds
    #[serde(default = "default_read_backoff_ms")]
    pub read_backoff_ms: u64,

    /// Delay after a failed connection attempt, in milliseconds
    #[serde(default = "default_reopen_delay_ms")]
    pub reopen_delay_ms: u64,

    /// Delay before retrying a failed segment start, in milliseconds
    #[serde(default = "default_segment_retry_delay_ms")]
    pub segment_retry_delay_ms: u64,

    /// Interval between reconciliation sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Primary video codec for segment encoding
    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    /// Fallback codec tried when the primary cannot be initialized
    #[serde(default = "default_fallback_codec")]
    pub fallback_codec: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("videos")
}

fn default_segment_duration_secs() -> u64 {
    3600
}

fn default_max_segments() -> usize {
    5
}

fn default_frame_rate() -> u32 {
    15
}

fn default_frame_width() -> u32 {
    720
}

fn default_frame_height() -> u32 {
    480
}

fn default_reconnect_threshold() -> u32 {
    10
}

fn default_read_backoff_ms() -> u64 {
    200
}

fn default_reopen_delay_ms() -> u64 {
    2000
}

fn default_segment_retry_delay_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_fallback_codec() -> String {
    "mpeg4".to_string()
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            output_dir: default_output_dir(),
            segment_duration_secs: default_segment_duration_secs(),
            max_segments: default_max_segments(),
            frame_rate: default_frame_rate(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            reconnect_threshold: default_reconnect_threshold(),
            read_backoff_ms: default_read_backoff_ms(),
            reopen_delay_ms: default_reopen_delay_ms(),
            segment_retry_delay_ms: default_segment_retry_delay_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            video_codec: default_video_codec(),
            fallback_codec: default_fallback_codec(),
        }
    }
}

impl RecorderConfig {
    /// Load and validate a configuration from a TOML file
    pub fn load(path: &Path) -> RecorderResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| RecorderError::Config(format!("invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every tunable once; called at startup before anything runs
    pub fn validate(&self) -> RecorderResult<()> {
        if self.source_url.trim().is_empty() {
            return Err(RecorderError::Config("source_url must be set".to_string()));
        }
        if self.segment_duration_secs == 0 {
            return Err(RecorderError::Config(
                "segment_duration_secs must be at least 1".to_string(),
            ));
        }
        if self.max_segments == 0 {
            return Err(RecorderError::Config(
                "max_segments must be at least 1".to_string(),
            ));
        }
        if self.frame_rate == 0 {
            return Err(RecorderError::Config("frame_rate must be at least 1".to_string()));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(RecorderError::Config(
                "frame dimensions must be non-zero".to_string(),
            ));
        }
        // yuv420p output requires even dimensions
        if self.frame_width % 2 != 0 || self.frame_height % 2 != 0 {
            return Err(RecorderError::Config(
                "frame dimensions must be even".to_string(),
            ));
        }
        if self.video_codec.trim().is_empty() || self.fallback_codec.trim().is_empty() {
            return Err(RecorderError::Config("codec names must be set".to_string()));
        }
        Ok(())
    }

    /// Length of one segment
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_secs)
    }

    /// Target interval between frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate as f64)
    }

    /// Backoff after a single read miss
    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    /// Delay after a failed connection attempt
    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }

    /// Delay before retrying a failed segment start
    pub fn segment_retry_delay(&self) -> Duration {
        Duration::from_millis(self.segment_retry_delay_ms)
    }

    /// Interval between reconciliation sweeps
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
