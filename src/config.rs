//! Configuration management for hexstream
//!
//! Loads user preferences from ~/.config/hexstream/config.toml

use crate::fetch::{ReadPolicy, DEFAULT_INITIAL_READ, DEFAULT_MAX_READ};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default config file contents
const DEFAULT_CONFIG: &str = r#"# hexstream configuration file
# Location: ~/.config/hexstream/config.toml

[buffer]
# Size of the first read from the input (bytes). Small values make typed or
# piped input appear immediately.
initial_read = 8

# Reads double in size up to this many bytes
max_read = 4096

[view]
# Screen refreshes per second while input is still streaming in
redraw_hz = 10

# How long one background read may wait before the screen is serviced (ms)
fetch_timeout_ms = 10

# Text column encoding: "auto" (byte order mark), "utf8", "utf16le", "utf16be"
encoding = "auto"

[save]
# Rename an existing file to name~ before overwriting it
create_backup = true

# File name offered when reading from standard input
default_output = "output.new"
"#;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub buffer: BufferConfig,
    pub view: ViewConfig,
    pub save: SaveConfig,
}

/// Read-size growth policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub initial_read: usize,
    pub max_read: usize,
}

/// Screen refresh preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub redraw_hz: u32,
    pub fetch_timeout_ms: u64,
    pub encoding: String,
}

/// Save preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub create_backup: bool,
    pub default_output: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_read: DEFAULT_INITIAL_READ,
            max_read: DEFAULT_MAX_READ,
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            redraw_hz: 10,
            fetch_timeout_ms: 10,
            encoding: "auto".to_string(),
        }
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            create_backup: true,
            default_output: "output.new".to_string(),
        }
    }
}

impl BufferConfig {
    pub fn read_policy(&self) -> ReadPolicy {
        ReadPolicy::new(self.initial_read, self.max_read)
    }
}

impl ViewConfig {
    /// Time between refreshes while streaming
    pub fn redraw_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.redraw_hz.max(1)))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.max(1))
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hexstream").join("config.toml"))
    }

    /// Load config from file, or return defaults
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("using default config: {:#}", e);
                Self::default()
            }
        }
    }

    /// Try to load config from file
    pub fn try_load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config directory")?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Create default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::config_path().context("Could not determine config directory")?;

        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(&path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write default config: {}", path.display()))?;

        Ok(true)
    }
}
