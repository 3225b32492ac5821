//! Modbus adapter error types.

use uhab_domain::error::{ConfigError, HubError, NotFoundError};

/// Errors specific to the Modbus adapter.
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    /// A binding line names a device missing from the `[modbus]` section.
    #[error("unknown Modbus device `{0}`")]
    UnknownDevice(String),

    /// An item index outside the device range.
    #[error("index {index} outside the {length} registers of `{device}`")]
    IndexRange {
        device: String,
        index: u16,
        length: u16,
    },

    /// Discrete inputs cannot be written.
    #[error("`{0}` is read-only")]
    ReadOnly(String),

    /// The item cannot write this state.
    #[error("cannot write {0}")]
    Unsupported(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The serial line could not be opened or configured.
    #[error("serial port error")]
    Serial(#[from] serialport::Error),

    #[error("Modbus line I/O error")]
    Io(#[from] std::io::Error),

    /// The slave answered with an exception or a corrupt frame.
    #[error("Modbus protocol error: {0}")]
    Protocol(rmodbus::ErrorKind),

    /// The slave did not answer.
    #[error("device `{0}` is offline")]
    Offline(String),
}

impl From<rmodbus::ErrorKind> for ModbusError {
    fn from(err: rmodbus::ErrorKind) -> Self {
        Self::Protocol(err)
    }
}

impl ModbusError {
    /// Convert into a [`HubError`] for propagation across port boundaries.
    pub fn into_domain(self) -> HubError {
        match self {
            Self::UnknownDevice(name) => NotFoundError::new("Modbus device", name).into(),
            Self::Config(err) => err.into(),
            Self::IndexRange { .. } | Self::ReadOnly(_) | Self::Unsupported(_) => {
                ConfigError::Unsupported(self.to_string()).into()
            }
            Self::Serial(_) | Self::Io(_) | Self::Protocol(_) | Self::Offline(_) => {
                HubError::DeviceIo(Box::new(self))
            }
        }
    }
}

impl From<ModbusError> for HubError {
    fn from(err: ModbusError) -> Self {
        err.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_read_only_to_config_error() {
        let err: HubError = ModbusError::ReadOnly("inputs".into()).into();
        assert!(matches!(err, HubError::Config(ConfigError::Unsupported(_))));
    }

    #[test]
    fn should_convert_offline_to_device_io() {
        let err: HubError = ModbusError::Offline("meter".into()).into();
        assert!(matches!(err, HubError::DeviceIo(_)));
    }

    #[test]
    fn should_display_index_range() {
        let err = ModbusError::IndexRange {
            device: "relays".into(),
            index: 9,
            length: 8,
        };
        assert_eq!(err.to_string(), "index 9 outside the 8 registers of `relays`");
    }
}
