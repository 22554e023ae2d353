// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{DeviceAddress, LinkConfig, DEFAULT_RFCOMM_CHANNEL};

const APP_DIR: &str = "feeder-link";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for the schedule database.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Link tuning.
    pub link: LinkSettings,

    /// Schedule synchronization.
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Feeder address used by `connect` without an argument.
    pub device_address: Option<String>,

    /// RFCOMM channel of the feeder's serial service.
    pub rfcomm_channel: u8,

    /// Connect to `device_address` on startup.
    pub auto_connect: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            rfcomm_channel: DEFAULT_RFCOMM_CHANNEL,
            auto_connect: false,
        }
    }
}

impl BluetoothConfig {
    /// The configured feeder address, if set and valid.
    pub fn address(&self) -> Result<Option<DeviceAddress>> {
        self.device_address
            .as_deref()
            .map(DeviceAddress::parse)
            .transpose()
            .context("bluetooth.device_address")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Give up on a connection attempt after this many seconds.
    pub connect_timeout_secs: u64,

    /// Drop the link after this many write failures in a row (0 = never).
    pub max_write_failures: u32,

    /// Outbound messages that may wait for the writer.
    pub send_queue_depth: usize,

    /// Bytes requested per read.
    pub read_buffer_size: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let defaults = LinkConfig::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            max_write_failures: defaults.max_write_failures,
            send_queue_depth: defaults.send_queue_depth,
            read_buffer_size: defaults.read_buffer_size,
        }
    }
}

impl From<&LinkSettings> for LinkConfig {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs.max(1)),
            max_write_failures: settings.max_write_failures,
            send_queue_depth: settings.send_queue_depth.max(1),
            read_buffer_size: settings.read_buffer_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Push the schedule to the feeder right after connecting.
    pub sync_on_connect: bool,

    /// Push the schedule after every local edit.
    pub sync_on_change: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sync_on_connect: true,
            sync_on_change: true,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let mut config = Self::load_from(&config_dir.join("config.toml"))?;

        config.data_dir = data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Load configuration from `path`, writing defaults there if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(path, content)?;
            config
        };

        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let config_path = config_dir().join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    /// Runtime settings for the connection manager.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::from(&self.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bluetooth.rfcomm_channel, DEFAULT_RFCOMM_CHANNEL);
        assert_eq!(config.link.connect_timeout_secs, 15);
        assert_eq!(config.link.max_write_failures, 3);
        assert!(config.schedule.sync_on_connect);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.link.send_queue_depth, config.link.send_queue_depth);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[bluetooth]\ndevice_address = \"b8:27:eb:67:07:b9\"\n\n[link]\nconnect_timeout_secs = 5\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.bluetooth.address().unwrap().unwrap().to_string(),
            "B8:27:EB:67:07:B9"
        );
        assert_eq!(config.link.connect_timeout_secs, 5);
        assert_eq!(config.link.max_write_failures, 3);
        assert!(config.schedule.sync_on_change);

        let link = config.link_config();
        assert_eq!(link.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_address_is_reported() {
        let config = Config {
            bluetooth: BluetoothConfig {
                device_address: Some("feeder".to_string()),
                ..BluetoothConfig::default()
            },
            ..Config::default()
        };
        assert!(config.bluetooth.address().is_err());
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let settings = LinkSettings {
            connect_timeout_secs: 0,
            max_write_failures: 0,
            send_queue_depth: 0,
            read_buffer_size: 0,
        };
        let link = LinkConfig::from(&settings);
        assert_eq!(link.connect_timeout, Duration::from_secs(1));
        assert_eq!(link.max_write_failures, 0);
        assert_eq!(link.send_queue_depth, 1);
        assert_eq!(link.read_buffer_size, 1);
    }
}
