//! Player configuration
use crate::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Program used to transcode live streams
    #[serde(default = "default_transcoder_path")]
    pub transcoder_path: PathBuf,

    /// Completion monitor poll interval
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Timeout for the ICY response headers
    #[serde(default = "default_icy_header_timeout_secs")]
    pub icy_header_timeout_secs: u64,

    /// Bytes of recent output kept for visualizers
    #[serde(default = "default_sample_ring_bytes")]
    pub sample_ring_bytes: usize,

    /// Source frames pulled per normalizer refill
    #[serde(default = "default_resample_chunk_frames")]
    pub resample_chunk_frames: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            transcoder_path: default_transcoder_path(),
            monitor_interval_ms: default_monitor_interval_ms(),
            icy_header_timeout_secs: default_icy_header_timeout_secs(),
            sample_ring_bytes: default_sample_ring_bytes(),
            resample_chunk_frames: default_resample_chunk_frames(),
        }
    }
}

impl PlayerConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// Environment variables are prefixed with `TONEARM_`, for example
    /// `TONEARM_TRANSCODER_PATH=/opt/ffmpeg/bin/ffmpeg`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(PlayerError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            settings = settings.add_source(config::File::from(path));
        }

        // Override with environment variables (prefixed with TONEARM_)
        settings = settings.add_source(config::Environment::with_prefix("TONEARM").try_parsing(true));

        let config: Self = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.transcoder_path.as_os_str().is_empty() {
            return Err(PlayerError::Config(
                "transcoder_path must not be empty".to_string(),
            ));
        }
        if self.monitor_interval_ms == 0 {
            return Err(PlayerError::Config(
                "monitor_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.resample_chunk_frames == 0 {
            return Err(PlayerError::Config(
                "resample_chunk_frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn icy_header_timeout(&self) -> Duration {
        Duration::from_secs(self.icy_header_timeout_secs)
    }
}

// Default values
fn default_transcoder_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_monitor_interval_ms() -> u64 {
    50
}

fn default_icy_header_timeout_secs() -> u64 {
    10
}

fn default_sample_ring_bytes() -> usize {
    16 * 1024
}

fn default_resample_chunk_frames() -> usize {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.transcoder_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.monitor_interval(), Duration::from_millis(50));
        assert_eq!(config.icy_header_timeout(), Duration::from_secs(10));
        assert_eq!(config.sample_ring_bytes, 16384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tonearm.toml");
        std::fs::write(&path, "monitor_interval_ms = 20\nsample_ring_bytes = 4096\n").unwrap();

        let config = PlayerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.monitor_interval_ms, 20);
        assert_eq!(config.sample_ring_bytes, 4096);
        assert_eq!(config.resample_chunk_frames, 4096);
    }

    #[test]
    fn rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "monitor_interval_ms = 0\n").unwrap();

        assert!(matches!(
            PlayerConfig::load(Some(&path)),
            Err(PlayerError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = PlayerConfig::load(Some(Path::new("/nonexistent/tonearm.toml")));
        assert!(matches!(result, Err(PlayerError::Config(_))));
    }
}
