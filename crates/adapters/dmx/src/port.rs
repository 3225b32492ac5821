//! Frame sinks: a serial DMX512 interface or an in-memory recorder.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::config::{Connection, DmxDeviceConfig};
use crate::error::DmxError;

const DMX_BAUD_RATE: u32 = 250_000;
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Accepts complete frames, start code included.
pub trait DmxPort: Send {
    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns [`DmxError::Io`] when the interface refuses the frame.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DmxError>;
}

/// Opens the port of a named interface when the binding starts.
pub type PortFactory =
    Arc<dyn Fn(&str, &DmxDeviceConfig) -> Result<Box<dyn DmxPort>, DmxError> + Send + Sync>;

/// Opens serial interfaces and in-memory ports according to the connection.
#[must_use]
pub fn default_factory(break_time: Duration) -> PortFactory {
    Arc::new(move |name: &str, device: &DmxDeviceConfig| -> Result<Box<dyn DmxPort>, DmxError> {
        match &device.connection {
            Connection::Serial(path) => {
                tracing::info!(device = name, path = %path, "opening DMX interface");
                Ok(Box::new(SerialDmxPort::open(path, break_time)?))
            }
            Connection::Memory => Ok(Box::new(MemoryPort::default())),
        }
    })
}

/// RS-485 interface driven by a UART at 250 kbaud, 8N2.
pub struct SerialDmxPort {
    port: Box<dyn SerialPort>,
    break_time: Duration,
}

impl SerialDmxPort {
    /// # Errors
    ///
    /// Returns [`DmxError::Serial`] if the port cannot be opened.
    pub fn open(path: &str, break_time: Duration) -> Result<Self, DmxError> {
        let port = serialport::new(path, DMX_BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .timeout(WRITE_TIMEOUT)
            .open()?;
        Ok(Self { port, break_time })
    }
}

impl DmxPort for SerialDmxPort {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DmxError> {
        self.port.set_break()?;
        std::thread::sleep(self.break_time);
        self.port.clear_break()?;
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }
}

/// Keeps every frame written; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MemoryPort {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryPort {
    #[must_use]
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.lock().last().cloned()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DmxPort for MemoryPort {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DmxError> {
        self.lock().push(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_share_frames_between_clones() {
        let port = MemoryPort::default();
        let mut writer = port.clone();
        writer.write_frame(&[0, 1, 2]).unwrap();
        writer.write_frame(&[0, 3, 4]).unwrap();

        assert_eq!(port.frame_count(), 2);
        assert_eq!(port.last_frame(), Some(vec![0, 3, 4]));
    }

    #[test]
    fn should_open_memory_port_from_factory() {
        let factory = default_factory(Duration::from_micros(100));
        let device = DmxDeviceConfig {
            connection: Connection::Memory,
            min_channels: 8,
        };
        let mut port = factory("bench", &device).unwrap();
        port.write_frame(&[0; 9]).unwrap();
    }
}
