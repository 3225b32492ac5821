//! DMX adapter error types.

use uhab_domain::error::{ConfigError, HubError, NotFoundError};
use uhab_domain::state::StateKind;

/// Errors specific to the DMX adapter.
#[derive(Debug, thiserror::Error)]
pub enum DmxError {
    /// A binding line names a device missing from the `[dmx]` section.
    #[error("unknown DMX device `{0}`")]
    UnknownDevice(String),

    /// A channel number outside `1..=511`.
    #[error("DMX channel {0} out of range")]
    ChannelRange(u16),

    /// A binding line lists more channels than an item may drive.
    #[error("at most {0} channels per item")]
    TooManyChannels(usize),

    /// The item cannot execute this state.
    #[error("DMX items do not accept {0}")]
    Unsupported(String),

    /// Malformed binding parameter.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The serial interface could not be opened or configured.
    #[error("serial port error")]
    Serial(#[from] serialport::Error),

    /// Writing a frame failed.
    #[error("DMX write failed")]
    Io(#[from] std::io::Error),
}

impl DmxError {
    pub(crate) fn unsupported_state(kind: StateKind) -> Self {
        Self::Unsupported(format!("{kind} states"))
    }

    /// Convert into a [`HubError`] for propagation across port boundaries.
    pub fn into_domain(self) -> HubError {
        match self {
            Self::UnknownDevice(name) => NotFoundError::new("DMX device", name).into(),
            Self::Config(err) => err.into(),
            Self::ChannelRange(_) | Self::TooManyChannels(_) | Self::Unsupported(_) => {
                ConfigError::Unsupported(self.to_string()).into()
            }
            Self::Serial(_) | Self::Io(_) => HubError::DeviceIo(Box::new(self)),
        }
    }
}

impl From<DmxError> for HubError {
    fn from(err: DmxError) -> Self {
        err.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_unknown_device_to_not_found() {
        let err: HubError = DmxError::UnknownDevice("stage".into()).into();
        assert!(matches!(err, HubError::NotFound(ref e) if e.id == "stage"));
    }

    #[test]
    fn should_convert_write_failure_to_device_io() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "no answer");
        let err: HubError = DmxError::Io(io).into();
        assert!(matches!(err, HubError::DeviceIo(_)));
    }

    #[test]
    fn should_display_channel_range_error() {
        assert_eq!(
            DmxError::ChannelRange(600).to_string(),
            "DMX channel 600 out of range"
        );
    }
}
