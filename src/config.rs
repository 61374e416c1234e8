//! Retrace configuration.
//!
//! Loaded from `~/.retrace/config.toml`. Every key is optional; a missing
//! file means all defaults. Command-line flags override what's here.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::interpret::{Options, Timing};
use crate::locate;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config at {}: {source}", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Prepended to every `shell_command`, e.g. `"set -e; "`.
    pub shell_command_prefix: String,

    /// Seconds to keep looking for patterns when an event sets no `timeout`.
    pub pattern_timeout: f64,

    /// Seconds between screenshots when an event sets no `delay`.
    pub pattern_delay: f64,

    /// Seconds to wait before the first screenshot of a search.
    pub settle_before_screenshot: f64,

    /// Method name to threshold. When non-empty, replaces the built-in set:
    ///
    /// ```toml
    /// [thresholds]
    /// TM_SQDIFF_NORMED = 0.99
    /// ```
    pub thresholds: BTreeMap<String, f64>,

    pub screencast_fps: u32,

    /// X display for input, screenshots and recording.
    pub display: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell_command_prefix: String::new(),
            pattern_timeout: 10.0,
            pattern_delay: 2.0,
            settle_before_screenshot: 2.0,
            thresholds: BTreeMap::new(),
            screencast_fps: 15,
            display: ":0.0".to_string(),
        }
    }
}

impl Config {
    /// Load config from `~/.retrace/config.toml`, or defaults if there is
    /// no home directory or no file.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The config file path: `~/.retrace/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".retrace").join("config.toml"))
    }

    /// Interpreter options seeded from this config.
    pub fn options(&self) -> Options {
        let thresholds = if self.thresholds.is_empty() {
            locate::default_thresholds()
        } else {
            self.thresholds.clone()
        };
        Options {
            shell_command_prefix: self.shell_command_prefix.clone(),
            pattern_timeout: self.pattern_timeout,
            pattern_delay: self.pattern_delay,
            thresholds,
            timing: Timing {
                before_screenshot: self.settle_before_screenshot,
                ..Timing::default()
            },
            ..Options::default()
        }
    }
}
