// src/config.rs

//! Configuration structures for the compositor.
//!
//! The whole tree deserializes from JSON, either from the file named by
//! `COMPOSITOR_CONFIG` (standalone daemon) or from the config line a plugin
//! host hands to `configure`. Every struct carries `#[serde(default)]`, so a
//! partial document only overrides the keys it names.

use anyhow::{Context, Result};
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::scene::viewport::ViewportStrategy;

/// Environment variable naming the JSON config file for the daemon.
pub const CONFIG_PATH_ENV: &str = "COMPOSITOR_CONFIG";

/// Process-wide configuration, loaded on first use.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

// --- Top-Level Configuration Structure ---

/// Root of the compositor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// External access endpoint, exported to children as `COMPOSITOR`.
    pub connector: String,
    /// Output port reported through the display capability.
    pub port: String,
    /// Descriptor exchange settings.
    pub transfer: TransferConfig,
    /// Render pipeline settings.
    pub render: RenderConfig,
    /// Display/platform backend selection.
    pub platform: PlatformConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connector: "/tmp/compositor".to_string(),
            port: "HDMI0".to_string(),
            transfer: TransferConfig::default(),
            render: RenderConfig::default(),
            platform: PlatformConfig::default(),
        }
    }
}

impl Config {
    /// Parses a JSON document. An empty or whitespace-only string yields the
    /// defaults, which is what a host sends when nothing was configured.
    pub fn from_json_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_json::from_str(text).context("Failed to parse compositor configuration")
    }

    /// Loads the file named by `COMPOSITOR_CONFIG`, falling back to defaults
    /// when the variable is unset or the file cannot be used.
    pub fn load_or_default() -> Self {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => {
                info!("Config: {} not set, using defaults.", CONFIG_PATH_ENV);
                return Config::default();
            }
        };

        let loaded = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))
            .and_then(|text| Config::from_json_str(&text));

        match loaded {
            Ok(config) => {
                info!("Config: loaded {}", path.display());
                config
            }
            Err(e) => {
                warn!("Config: {:#}. Using defaults.", e);
                Config::default()
            }
        }
    }
}

// --- Transfer Channel Configuration ---

/// Settings for the cross-process descriptor exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Filesystem path of the rendezvous socket.
    pub socket_path: PathBuf,
    /// Receive buffer capacity for a single request message.
    pub max_message_len: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            socket_path: PathBuf::from("/tmp/Compositor/DMA"),
            max_message_len: 4096,
        }
    }
}

// --- Render Configuration ---

/// Settings for the two-stage render pipeline and the client value domains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Pass rate used when the output cannot tell us its refresh rate.
    pub default_refresh_hz: u32,
    /// How a layer's rectangle is turned into a device viewport.
    pub viewport_strategy: ViewportStrategy,
    pub min_zorder: u32,
    pub max_zorder: u32,
    pub min_opacity: u32,
    pub max_opacity: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            default_refresh_hz: 60,
            viewport_strategy: ViewportStrategy::default(),
            min_zorder: 0,
            max_zorder: 255,
            min_opacity: 0,
            max_opacity: 255,
        }
    }
}

// --- Platform Configuration ---

/// Which display backend to drive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformBackend {
    /// DRM/KMS scan-out with GBM buffers.
    #[default]
    Kms,
    /// No display hardware; buffers are plain memory descriptors.
    Headless,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlatformConfig {
    pub backend: PlatformBackend,
    /// DRM device node used by the KMS backend.
    pub device: PathBuf,
    pub headless_width: u32,
    pub headless_height: u32,
    pub headless_refresh_hz: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            backend: PlatformBackend::default(),
            device: PathBuf::from("/dev/dri/card0"),
            headless_width: 1920,
            headless_height: 1080,
            headless_refresh_hz: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn it_should_fill_missing_keys_with_defaults() -> Result<()> {
        let config = Config::from_json_str(r#"{ "port": "HDMI1", "render": { "max_zorder": 10 } }"#)?;
        assert_eq!(config.port, "HDMI1");
        assert_eq!(config.connector, "/tmp/compositor");
        assert_eq!(config.render.max_zorder, 10);
        assert_eq!(config.render.max_opacity, 255);
        assert_eq!(config.transfer.socket_path, PathBuf::from("/tmp/Compositor/DMA"));
        Ok(())
    }

    #[test]
    fn it_should_treat_an_empty_line_as_defaults() -> Result<()> {
        assert_eq!(Config::from_json_str("  ")?, Config::default());
        Ok(())
    }

    #[test]
    fn it_should_parse_enum_settings_in_snake_case() -> Result<()> {
        let config = Config::from_json_str(
            r#"{ "platform": { "backend": "headless" }, "render": { "viewport_strategy": "direct" } }"#,
        )?;
        assert_eq!(config.platform.backend, PlatformBackend::Headless);
        assert_eq!(config.render.viewport_strategy, ViewportStrategy::Direct);
        Ok(())
    }

    #[test]
    fn it_should_reject_malformed_json() {
        assert!(Config::from_json_str("{ not json").is_err());
    }
}
