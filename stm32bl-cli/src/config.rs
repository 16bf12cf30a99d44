//! Configuration file support for stm32bl.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (STM32BL_*)
//! 3. Local config file (./stm32bl.toml)
//! 4. Global config file (~/.config/stm32bl/config.toml)
//!
//! Files hold only the keys a user wants to pin; every key is optional.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = "stm32bl.toml";

/// Protocol settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Frame layout name (`word-aligned` or `compact`).
    pub profile: Option<String>,
    /// Block payload size.
    pub block_size: Option<usize>,
    /// Require the CONNECT handshake.
    pub handshake: Option<bool>,
    /// CONNECT attempts.
    pub connect_attempts: Option<u32>,
    /// Acknowledgment timeout in milliseconds.
    pub ack_timeout_ms: Option<u64>,
    /// ERASE timeout in milliseconds.
    pub erase_timeout_ms: Option<u64>,
    /// READ checksum mismatch retries (0 aborts).
    pub checksum_retries: Option<u32>,
}

/// Target memory settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    /// Application base address, as a number or a hex string.
    pub address: Option<Address>,
    /// Bytes captured by read commands.
    pub read_size: Option<usize>,
}

/// Output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Default capture file for read commands.
    pub read_file: Option<PathBuf>,
}

/// Address written either as an integer or as `"0x0800_8000"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Address {
    /// Plain integer.
    Number(u32),
    /// Hex string.
    Text(String),
}

impl Address {
    /// Resolve to a numeric address.
    pub fn value(&self) -> Result<u32, String> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => crate::parse_hex_u32(s),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Protocol configuration.
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Target configuration.
    #[serde(default)]
    pub target: TargetConfig,
    /// Output configuration.
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "stm32bl").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; keys set in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        let p = other.protocol;
        take(&mut self.protocol.profile, p.profile);
        take(&mut self.protocol.block_size, p.block_size);
        take(&mut self.protocol.handshake, p.handshake);
        take(&mut self.protocol.connect_attempts, p.connect_attempts);
        take(&mut self.protocol.ack_timeout_ms, p.ack_timeout_ms);
        take(&mut self.protocol.erase_timeout_ms, p.erase_timeout_ms);
        take(&mut self.protocol.checksum_retries, p.checksum_retries);

        take(&mut self.target.address, other.target.address);
        take(&mut self.target.read_size, other.target.read_size);

        take(&mut self.output.read_file, other.output.read_file);
    }
}
