//! Application configuration
//!
//! Stored as JSON at `<config_dir>/heartbeat_app/config.json`. Every field has
//! a default, so partial files (or no file at all) are fine.

use crate::waveform::reference::{ReferencePointStore, ABP_SECTION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// National Instruments USB vendor id
pub const NI_VENDOR_ID: u16 = 0x3923;
/// NI USB-6216 product id
pub const NI_6216_PRODUCT_ID: u16 = 0x733B;

fn default_sample_count() -> usize {
    crate::DEFAULT_SAMPLE_COUNT
}

fn default_waveform_section() -> String {
    ABP_SECTION.to_string()
}

fn default_vendor_id() -> u16 {
    NI_VENDOR_ID
}

fn default_product_id() -> u16 {
    NI_6216_PRODUCT_ID
}

fn default_device_name() -> String {
    "Dev1".to_string()
}

fn default_label() -> String {
    "NI-6216".to_string()
}

fn default_signal_channel() -> String {
    "ao0".to_string()
}

fn default_reference_channel() -> String {
    "ao1".to_string()
}

fn default_min_voltage() -> f64 {
    -10.0
}

fn default_max_voltage() -> f64 {
    10.0
}

fn default_sample_rate_hz() -> f64 {
    crate::DEFAULT_SAMPLE_RATE_HZ
}

/// Lower bound for the presence poll cadence
pub const MIN_POLL_INTERVAL_MS: u64 = 5;

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_write_timeout_s() -> f64 {
    10.0
}

/// Hardware and polling parameters for the DAQ session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB vendor id used for presence polling
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    /// USB product id used for presence polling
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    /// NI-DAQmx device name (as shown in NI MAX)
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Prefix for status messages
    #[serde(default = "default_label")]
    pub label: String,
    /// Channel carrying the synthesized waveform
    #[serde(default = "default_signal_channel")]
    pub signal_channel: String,
    /// Channel carrying the flat reference level
    #[serde(default = "default_reference_channel")]
    pub reference_channel: String,
    #[serde(default = "default_min_voltage")]
    pub min_voltage: f64,
    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,
    /// Output sample clock (Hz)
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: f64,
    /// USB presence poll cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Level written to the reference channel (V)
    #[serde(default)]
    pub reference_voltage: f64,
    /// Timeout for the initial buffer write (s)
    #[serde(default = "default_write_timeout_s")]
    pub write_timeout_s: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            device_name: default_device_name(),
            label: default_label(),
            signal_channel: default_signal_channel(),
            reference_channel: default_reference_channel(),
            min_voltage: default_min_voltage(),
            max_voltage: default_max_voltage(),
            sample_rate_hz: default_sample_rate_hz(),
            poll_interval_ms: default_poll_interval_ms(),
            reference_voltage: 0.0,
            write_timeout_s: default_write_timeout_s(),
        }
    }
}

impl DeviceConfig {
    /// Poll cadence, never below [`MIN_POLL_INTERVAL_MS`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    /// Fully qualified physical channel, e.g. `Dev1/ao0`
    pub fn physical_channel(&self, channel: &str) -> String {
        format!("{}/{}", self.device_name, channel)
    }
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reference-point document (None = default location)
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
    /// Section of the document holding the ABP points
    #[serde(default = "default_waveform_section")]
    pub waveform_section: String,
    /// Samples per synthesized beat
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings_path: None,
            waveform_section: default_waveform_section(),
            sample_count: default_sample_count(),
            device: DeviceConfig::default(),
        }
    }
}

impl AppConfig {
    /// Config file path: `<config_dir>/heartbeat_app/config.json`
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heartbeat_app")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Reference-point document to read
    pub fn settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(ReferencePointStore::default_path)
    }

    /// Store configured for the settings document and section
    pub fn reference_store(&self) -> ReferencePointStore {
        ReferencePointStore::with_section(self.settings_path(), self.waveform_section.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.settings_path, None);
        assert_eq!(config.sample_count, 1000);
        assert_eq!(config.waveform_section, "abp_waveform_features");
        assert_eq!(config.device.vendor_id, 0x3923);
        assert_eq!(config.device.product_id, 0x733B);
        assert_eq!(config.device.sample_rate_hz, 1000.0);
        assert_eq!(config.device.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.device.physical_channel("ao0"), "Dev1/ao0");
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"sample_count": 500, "device": {"device_name": "Dev3"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_count, 500);
        assert_eq!(config.device.device_name, "Dev3");
        assert_eq!(config.device.signal_channel, "ao0");
        assert_eq!(config.device.max_voltage, 10.0);
    }

    #[test]
    fn test_zero_poll_interval_is_floored() {
        let json = r#"{"device": {"poll_interval_ms": 0}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device.poll_interval_ms, 0);
        assert_eq!(
            config.device.poll_interval(),
            Duration::from_millis(MIN_POLL_INTERVAL_MS)
        );
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig {
            settings_path: Some(PathBuf::from("/opt/heartBeat.xml")),
            sample_count: 2000,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.settings_path(), PathBuf::from("/opt/heartBeat.xml"));
    }

    #[test]
    fn test_unparsable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppConfig::load_from(&path), AppConfig::default());
    }
}
