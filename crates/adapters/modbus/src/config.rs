//! Modbus binding configuration, the `[modbus]` section.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use uhab_domain::error::ConfigError;

/// Registers a single read may cover.
pub const MAX_READ_LENGTH: u16 = 125;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Default poll interval of a device, in milliseconds.
    pub poll_ms: u64,
    /// Capacity of the command queue.
    pub queue_size: usize,
    pub devices: BTreeMap<String, ModbusDeviceConfig>,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            poll_ms: 250,
            queue_size: 32,
            devices: BTreeMap::new(),
        }
    }
}

impl ModbusConfig {
    /// Poll interval of `device`, falling back to the section default.
    #[must_use]
    pub fn poll_interval(&self, device: &ModbusDeviceConfig) -> Duration {
        Duration::from_millis(device.poll_ms.unwrap_or(self.poll_ms).max(1))
    }

    /// Check every device block.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an empty or oversized
    /// register range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, device) in &self.devices {
            if device.length == 0 || device.length > MAX_READ_LENGTH {
                return Err(ConfigError::InvalidValue {
                    key: format!("{name}.length"),
                    value: device.length.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A slave and the register range polled from it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModbusDeviceConfig {
    pub connection: ModbusConnection,
    #[serde(rename = "type")]
    pub kind: RegisterKind,
    /// Slave address.
    pub id: u8,
    /// First register of the range.
    pub start: u16,
    /// Registers in the range.
    pub length: u16,
    /// Overrides the section poll interval, in milliseconds.
    #[serde(default)]
    pub poll_ms: Option<u64>,
}

/// Register table a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Coil,
    Discrete,
    Holding,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Coil => "coil",
            Self::Discrete => "discrete",
            Self::Holding => "holding",
        })
    }
}

/// Line a device hangs on.
///
/// `serial:<path>:<baud>:<delay ms>:<timeout ms>` is an RTU line; the delay
/// is kept between two transactions. `simulated` is an in-memory register
/// bank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ModbusConnection {
    Serial {
        path: String,
        baud_rate: u32,
        delay: Duration,
        timeout: Duration,
    },
    Simulated,
}

impl TryFrom<String> for ModbusConnection {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "simulated" {
            return Ok(Self::Simulated);
        }
        let invalid = || ConfigError::InvalidValue {
            key: "connection".into(),
            value: value.clone(),
        };
        let parts: Vec<&str> = value.split(':').collect();
        let ["serial", path, baud, delay, timeout] = parts.as_slice() else {
            return Err(invalid());
        };
        if path.is_empty() {
            return Err(invalid());
        }
        let millis = |raw: &str| raw.parse::<u64>().map(Duration::from_millis).map_err(|_| invalid());
        Ok(Self::Serial {
            path: (*path).to_string(),
            baud_rate: baud.parse().map_err(|_| invalid())?,
            delay: millis(delay)?,
            timeout: millis(timeout)?,
        })
    }
}

impl fmt::Display for ModbusConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial {
                path,
                baud_rate,
                delay,
                timeout,
            } => write!(
                f,
                "serial:{path}:{baud_rate}:{}:{}",
                delay.as_millis(),
                timeout.as_millis()
            ),
            Self::Simulated => f.write_str("simulated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = ModbusConfig::default();
        assert_eq!(config.poll_ms, 250);
        assert_eq!(config.queue_size, 32);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn should_deserialize_devices_from_toml() {
        let toml = r#"
            poll_ms = 500

            [devices.relays]
            connection = "serial:/dev/ttyS1:19200:5:100"
            type = "coil"
            id = 3
            start = 16
            length = 8
            poll_ms = 100

            [devices.meter]
            connection = "simulated"
            type = "holding"
            id = 1
            start = 0
            length = 4
        "#;
        let config: ModbusConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        let relays = &config.devices["relays"];
        assert_eq!(relays.kind, RegisterKind::Coil);
        assert_eq!(
            relays.connection,
            ModbusConnection::Serial {
                path: "/dev/ttyS1".into(),
                baud_rate: 19200,
                delay: Duration::from_millis(5),
                timeout: Duration::from_millis(100),
            }
        );
        assert_eq!(config.poll_interval(relays), Duration::from_millis(100));
        assert_eq!(
            config.poll_interval(&config.devices["meter"]),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn should_reject_connection_with_missing_fields() {
        let err = ModbusConnection::try_from("serial:/dev/ttyS1:19200".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(ModbusConnection::try_from("tcp:10.0.0.2:502:0:0".to_string()).is_err());
    }

    #[test]
    fn should_display_connection_as_configured() {
        let raw = "serial:/dev/ttyS1:9600:0:250";
        let connection = ModbusConnection::try_from(raw.to_string()).unwrap();
        assert_eq!(connection.to_string(), raw);
    }

    #[test]
    fn should_reject_empty_range() {
        let toml = r#"
            [devices.meter]
            connection = "simulated"
            type = "holding"
            id = 1
            start = 0
            length = 0
        "#;
        let config: ModbusConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
