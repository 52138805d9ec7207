//! On-disk configuration: a plain TOML key/value record. Missing file is created from
//! built-in defaults on first run.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StartupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Vertical,
    North,
    East,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub adc_channel: u8,
    pub orientation: Orientation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_device")]
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// BCM GPIO number driving the RS-485 transceiver's driver-enable line.
    #[serde(default = "default_de_pin_bcm")]
    pub de_pin_bcm: u8,
}

fn default_serial_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    250_000
}

fn default_de_pin_bcm() -> u8 {
    18
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_serial_device(),
            baud_rate: default_baud_rate(),
            de_pin_bcm: default_de_pin_bcm(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub network: String,
    pub station: String,
    pub sampling_rate: u16,
    pub decimation_factor: u32,
    pub adc_pga_index: u8,
    pub adc_data_rate_index: u8,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_write_interval_secs")]
    pub write_interval_secs: u64,
    #[serde(default = "default_event_window_secs")]
    pub event_window_secs: u64,
    #[serde(default = "default_sta_secs")]
    pub sta_secs: f64,
    #[serde(default = "default_lta_secs")]
    pub lta_secs: f64,
    #[serde(default = "default_on_threshold")]
    pub on_threshold: f64,
    #[serde(default = "default_off_threshold")]
    pub off_threshold: f64,
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}
fn default_write_interval_secs() -> u64 {
    1800
}
fn default_event_window_secs() -> u64 {
    300
}
fn default_sta_secs() -> f64 {
    1.0
}
fn default_lta_secs() -> f64 {
    30.0
}
fn default_on_threshold() -> f64 {
    3.5
}
fn default_off_threshold() -> f64 {
    1.5
}
fn default_broadcast_addr() -> String {
    "0.0.0.0:8765".to_string()
}

/// The ADC data rate (SPS) that each `adc_data_rate_index` resolves to. Mirrors the
/// MCU-side `SPS_MAPPING` lookup table; kept here only for the sampling-rate/data-rate
/// compatibility check, since the MCU itself is out of scope.
const ADC_DATA_RATE_SPS: [f64; 16] = [
    2.5, 5.0, 10.0, 15.0, 25.0, 30.0, 50.0, 60.0, 100.0, 500.0, 1000.0, 2000.0, 3750.0, 7500.0,
    15000.0, 30000.0,
];

impl Settings {
    pub fn default_settings() -> Self {
        Self {
            network: "XX".to_string(),
            station: "RPI3".to_string(),
            sampling_rate: 100,
            decimation_factor: 4,
            adc_pga_index: 6,
            adc_data_rate_index: 11,
            channels: vec![
                ChannelConfig {
                    name: "EHZ".to_string(),
                    adc_channel: 0,
                    orientation: Orientation::Vertical,
                },
                ChannelConfig {
                    name: "EHN".to_string(),
                    adc_channel: 1,
                    orientation: Orientation::North,
                },
                ChannelConfig {
                    name: "EHE".to_string(),
                    adc_channel: 2,
                    orientation: Orientation::East,
                },
            ],
            serial: SerialConfig::default(),
            data_dir: default_data_dir(),
            write_interval_secs: default_write_interval_secs(),
            event_window_secs: default_event_window_secs(),
            sta_secs: default_sta_secs(),
            lta_secs: default_lta_secs(),
            on_threshold: default_on_threshold(),
            off_threshold: default_off_threshold(),
            broadcast_addr: default_broadcast_addr(),
        }
    }

    /// Loads the config at `path`, writing built-in defaults to that path first if it
    /// does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, StartupError> {
        if !path.exists() {
            let settings = Self::default_settings();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&settings)
                .map_err(|e| StartupError::ConfigInvalid(e.to_string()))?;
            fs::write(path, toml)?;
            settings.validate()?;
            return Ok(settings);
        }

        let raw = fs::read_to_string(path)?;
        let settings: Settings =
            toml::from_str(&raw).map_err(|e| StartupError::ConfigInvalid(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Enforces the invariants a config must hold before any worker starts.
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.sampling_rate == 0 {
            return Err(StartupError::ConfigInvalid(
                "sampling_rate must be positive".to_string(),
            ));
        }
        if self.decimation_factor < 2 {
            return Err(StartupError::ConfigInvalid(
                "decimation_factor must be >= 2".to_string(),
            ));
        }
        if self.sampling_rate as u32 % self.decimation_factor != 0 {
            return Err(StartupError::ConfigInvalid(format!(
                "sampling_rate ({}) is not evenly divisible by decimation_factor ({})",
                self.sampling_rate, self.decimation_factor
            )));
        }
        if self.network.is_empty() || self.network.len() > 2 {
            return Err(StartupError::ConfigInvalid(
                "network must be a 1-2 character code".to_string(),
            ));
        }
        if self.station.is_empty() || self.station.len() > 5 {
            return Err(StartupError::ConfigInvalid(
                "station must be a 1-5 character code".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for ch in &self.channels {
            if ch.adc_channel > 2 {
                return Err(StartupError::ConfigInvalid(format!(
                    "channel {} has adc_channel {} outside 0..=2",
                    ch.name, ch.adc_channel
                )));
            }
            if !seen.insert(ch.name.as_str()) {
                return Err(StartupError::ConfigInvalid(format!(
                    "duplicate channel name: {}",
                    ch.name
                )));
            }
        }
        if self.channels.is_empty() {
            return Err(StartupError::ConfigInvalid(
                "at least one channel is required".to_string(),
            ));
        }

        // Three-channel multiplex timing rule: the ADC's data rate must be able to
        // service all channels at the requested sampling rate with margin, i.e.
        // adc_data_rate >= 13 * sampling_rate.
        let idx = self.adc_data_rate_index as usize;
        let actual_sps = *ADC_DATA_RATE_SPS
            .get(idx)
            .ok_or_else(|| StartupError::ConfigInvalid(format!("adc_data_rate_index {idx} out of range")))?;
        let min_required = self.sampling_rate as f64 * 13.0;
        if actual_sps < min_required {
            return Err(StartupError::ConfigInvalid(format!(
                "sampling_rate ({} Hz) requires an ADC data rate >= {} SPS (13x rule), \
                 but adc_data_rate_index {} only provides {} SPS",
                self.sampling_rate, min_required, idx, actual_sps
            )));
        }

        Ok(())
    }

    /// The channel designated as the trigger channel: index 0 in the configured list.
    pub fn trigger_channel(&self) -> &ChannelConfig {
        &self.channels[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let settings = Settings::default_settings();
        settings.validate().expect("defaults must validate");
    }

    #[test]
    fn rejects_indivisible_decimation() {
        let mut settings = Settings::default_settings();
        settings.sampling_rate = 100;
        settings.decimation_factor = 3;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_sampling_rate_too_fast_for_adc() {
        let mut settings = Settings::default_settings();
        settings.sampling_rate = 5000;
        settings.adc_data_rate_index = 0; // 2.5 SPS
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_or_create_writes_defaults_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let first = Settings::load_or_create(&path).unwrap();
        assert!(path.exists());
        let second = Settings::load_or_create(&path).unwrap();
        assert_eq!(first.station, second.station);
        assert_eq!(first.channels.len(), second.channels.len());
    }
}
