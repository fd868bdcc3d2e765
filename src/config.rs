//! Configuration file support for the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::audiocmd::RecordProgram;
use crate::defaults;
use crate::error::{EimrunError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Directory request/response traces and frame snapshots are written
    /// to, when set.
    pub trace_dir: Option<PathBuf>,
    pub audio: AudioConfig,
    pub camera: CameraConfig,
    pub ingest: IngestConfig,
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Device to record from, as printed by `eimrun devices`.
    pub device: Option<String>,
    /// Interval between classifications, in milliseconds.
    pub interval_ms: u64,
    pub record_program: RecordProgram,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            device: None,
            interval_ms: defaults::AUDIO_INTERVAL.as_millis() as u64,
            record_program: RecordProgram::default(),
        }
    }
}

/// Camera capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Device to record from, as printed by `eimrun devices`.
    pub device: Option<String>,
    /// Interval between frames, in milliseconds.
    pub interval_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            device: None,
            interval_ms: defaults::IMAGE_INTERVAL.as_millis() as u64,
        }
    }
}

/// Ingestion upload credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct IngestConfig {
    pub api_key: Option<String>,
    /// Hex-encoded HMAC key.
    pub hmac_key: Option<String>,
    pub base_url: Option<String>,
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| EimrunError::Config {
            message: format!("reading {}: {e}", path.display()),
        })?;
        toml::from_str(&contents).map_err(|e| EimrunError::Config {
            message: format!("parsing {}: {e}", path.display()),
        })
    }

    /// Loads the explicit path when given, the default path when it
    /// exists, and defaults otherwise. An explicit path must load.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// `$XDG_CONFIG_HOME/eimrun/config.toml` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        #[cfg(feature = "cli")]
        {
            dirs::config_dir().map(|dir| dir.join("eimrun").join("config.toml"))
        }
        #[cfg(not(feature = "cli"))]
        {
            None
        }
    }

    /// Applies `EIMRUN_API_KEY` and `EIMRUN_HMAC_KEY` overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_key_overrides(
            std::env::var("EIMRUN_API_KEY").ok(),
            std::env::var("EIMRUN_HMAC_KEY").ok(),
        )
    }

    fn with_key_overrides(mut self, api_key: Option<String>, hmac_key: Option<String>) -> Self {
        if let Some(api_key) = api_key
            && !api_key.is_empty()
        {
            self.ingest.api_key = Some(api_key);
        }
        if let Some(hmac_key) = hmac_key
            && !hmac_key.is_empty()
        {
            self.ingest.hmac_key = Some(hmac_key);
        }
        self
    }
}
