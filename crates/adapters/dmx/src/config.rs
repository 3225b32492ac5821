//! DMX binding configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use uhab_domain::error::ConfigError;

use crate::fixture::MAX_CHANNEL;

const MIN_POLL_MS: u64 = 20;
const MIN_FADETICK_MS: u64 = 20;
const DEFAULT_PERIODICAL_FADETIME_MS: u64 = 6000;

/// Configuration for the DMX binding, the `[dmx]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DmxConfig {
    /// Interval between two frames sent to each interface, in milliseconds.
    pub poll_ms: u64,
    /// Interval between two fader steps, in milliseconds.
    pub fadetick_ms: u64,
    /// Duration of one half sweep started by `START`, in milliseconds.
    pub periodical_fadetime_ms: u64,
    /// Minimum interval between two level reports of a sweep, in milliseconds.
    pub periodical_update_ms: u64,
    /// Length of the break preceding each frame, in microseconds.
    pub break_us: u64,
    /// Capacity of the command queue.
    pub queue_size: usize,
    /// Interfaces by name.
    pub devices: BTreeMap<String, DmxDeviceConfig>,
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self {
            poll_ms: MIN_POLL_MS,
            fadetick_ms: MIN_FADETICK_MS,
            periodical_fadetime_ms: DEFAULT_PERIODICAL_FADETIME_MS,
            periodical_update_ms: 500,
            break_us: 100,
            queue_size: 32,
            devices: BTreeMap::new(),
        }
    }
}

impl DmxConfig {
    /// Frame interval, never below 20 ms.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(MIN_POLL_MS))
    }

    /// Fader tick, never below 20 ms.
    #[must_use]
    pub fn fadetick(&self) -> Duration {
        Duration::from_millis(self.fadetick_ms.max(MIN_FADETICK_MS))
    }

    /// Sweep half period; values shorter than one tick fall back to 6 s.
    #[must_use]
    pub fn periodical_fadetime(&self) -> Duration {
        let fadetime = Duration::from_millis(self.periodical_fadetime_ms);
        if fadetime < self.fadetick() {
            Duration::from_millis(DEFAULT_PERIODICAL_FADETIME_MS)
        } else {
            fadetime
        }
    }

    #[must_use]
    pub fn periodical_update(&self) -> Duration {
        Duration::from_millis(self.periodical_update_ms)
    }

    #[must_use]
    pub fn break_time(&self) -> Duration {
        Duration::from_micros(self.break_us)
    }

    /// Check device settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a `min_channels` outside
    /// `1..=511`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, device) in &self.devices {
            if device.min_channels == 0 || device.min_channels > MAX_CHANNEL {
                return Err(ConfigError::InvalidValue {
                    key: format!("{name}.min_channels"),
                    value: device.min_channels.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// One DMX interface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DmxDeviceConfig {
    pub connection: Connection,
    /// Channels always sent, even when no item uses them.
    #[serde(default = "default_min_channels")]
    pub min_channels: u16,
}

fn default_min_channels() -> u16 {
    8
}

/// Where frames of an interface go.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Connection {
    /// `serial:<path>`, an RS-485 adapter driven at 250 kbaud.
    Serial(String),
    /// `memory`, frames are kept in memory.
    Memory,
}

impl TryFrom<String> for Connection {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once(':') {
            Some(("serial", path)) if !path.is_empty() => Ok(Self::Serial(path.to_string())),
            None if value == "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: "connection".into(),
                value,
            }),
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(path) => write!(f, "serial:{path}"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = DmxConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
        assert_eq!(config.fadetick(), Duration::from_millis(20));
        assert_eq!(config.periodical_fadetime(), Duration::from_secs(6));
        assert_eq!(config.periodical_update(), Duration::from_millis(500));
        assert!(config.devices.is_empty());
    }

    #[test]
    fn should_deserialize_devices_from_toml() {
        let toml = r#"
            poll_ms = 40
            fadetick_ms = 25

            [devices.stage]
            connection = "serial:/dev/ttyUSB0"
            min_channels = 24

            [devices.bench]
            connection = "memory"
        "#;
        let config: DmxConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(40));
        assert_eq!(config.fadetick(), Duration::from_millis(25));
        assert_eq!(
            config.devices["stage"].connection,
            Connection::Serial("/dev/ttyUSB0".into())
        );
        assert_eq!(config.devices["stage"].min_channels, 24);
        assert_eq!(config.devices["bench"].connection, Connection::Memory);
        assert_eq!(config.devices["bench"].min_channels, 8);
        config.validate().unwrap();
    }

    #[test]
    fn should_clamp_intervals_below_minimum() {
        let config = DmxConfig {
            poll_ms: 5,
            fadetick_ms: 1,
            periodical_fadetime_ms: 10,
            ..DmxConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
        assert_eq!(config.fadetick(), Duration::from_millis(20));
        assert_eq!(config.periodical_fadetime(), Duration::from_secs(6));
    }

    #[test]
    fn should_reject_unknown_connection() {
        let toml = r#"
            [devices.stage]
            connection = "udp:10.0.0.1"
        "#;
        assert!(toml::from_str::<DmxConfig>(toml).is_err());
    }

    #[test]
    fn should_reject_min_channels_out_of_range() {
        let toml = r#"
            [devices.stage]
            connection = "memory"
            min_channels = 600
        "#;
        let config: DmxConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "stage.min_channels"
        ));
    }
}
