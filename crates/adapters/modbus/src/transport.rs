//! Register transports: Modbus RTU over a serial line, or an in-memory
//! register bank standing in for real slaves.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rmodbus::ModbusProto;
use rmodbus::client::ModbusRequest;
use serialport::{ClearBuffer, SerialPort};

use crate::config::ModbusConnection;
use crate::error::ModbusError;

/// Register access to the slaves of one line.
pub trait RegisterTransport: Send {
    fn read_coils(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<bool>, ModbusError>;

    fn read_discretes(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<bool>, ModbusError>;

    fn read_holdings(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<u16>, ModbusError>;

    fn write_coil(&mut self, unit: u8, address: u16, value: bool) -> Result<(), ModbusError>;

    fn write_holding(&mut self, unit: u8, address: u16, value: u16) -> Result<(), ModbusError>;
}

/// Opens the transport of a line when the binding starts.
pub type TransportFactory =
    Arc<dyn Fn(&ModbusConnection) -> Result<Box<dyn RegisterTransport>, ModbusError> + Send + Sync>;

/// Opens RTU lines and simulated banks according to the connection.
#[must_use]
pub fn default_factory() -> TransportFactory {
    Arc::new(
        |connection: &ModbusConnection| -> Result<Box<dyn RegisterTransport>, ModbusError> {
            match connection {
                ModbusConnection::Serial {
                    path,
                    baud_rate,
                    delay,
                    timeout,
                } => Ok(Box::new(RtuTransport::open(path, *baud_rate, *delay, *timeout)?)),
                ModbusConnection::Simulated => Ok(Box::new(SimulatedTransport::default())),
            }
        },
    )
}

/// Modbus RTU master on a serial port.
pub struct RtuTransport {
    port: Box<dyn SerialPort>,
    delay: Duration,
}

impl RtuTransport {
    /// # Errors
    ///
    /// Returns [`ModbusError::Serial`] if the port cannot be opened.
    pub fn open(
        path: &str,
        baud_rate: u32,
        delay: Duration,
        timeout: Duration,
    ) -> Result<Self, ModbusError> {
        let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
        tracing::info!(path, baud_rate, "Modbus line opened");
        Ok(Self { port, delay })
    }

    /// Send `frame` and read a reply of `expected` bytes, or the shorter
    /// exception reply.
    fn transact(
        &mut self,
        request: &mut ModbusRequest,
        frame: &[u8],
        expected: usize,
    ) -> Result<Vec<u8>, ModbusError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.port.clear(ClearBuffer::Input)?;
        self.port.write_all(frame)?;
        self.port.flush()?;

        let mut response = vec![0u8; 3];
        self.port.read_exact(&mut response)?;
        let remaining = if response[1] & 0x80 == 0 {
            expected.saturating_sub(3)
        } else {
            2
        };
        let mut tail = vec![0u8; remaining];
        self.port.read_exact(&mut tail)?;
        response.extend_from_slice(&tail);

        request.parse_ok(&response)?;
        Ok(response)
    }

    fn read_bits(&mut self, unit: u8, start: u16, count: u16, coils: bool) -> Result<Vec<bool>, ModbusError> {
        let mut request = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut frame = Vec::with_capacity(8);
        if coils {
            request.generate_get_coils(start, count, &mut frame)?;
        } else {
            request.generate_get_discretes(start, count, &mut frame)?;
        }
        let expected = 5 + usize::from(count).div_ceil(8);
        let response = self.transact(&mut request, &frame, expected)?;
        Ok(unpack_bits(&response[3..response.len() - 2], count))
    }
}

impl RegisterTransport for RtuTransport {
    fn read_coils(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<bool>, ModbusError> {
        self.read_bits(unit, start, count, true)
    }

    fn read_discretes(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<bool>, ModbusError> {
        self.read_bits(unit, start, count, false)
    }

    fn read_holdings(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<u16>, ModbusError> {
        let mut request = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut frame = Vec::with_capacity(8);
        request.generate_get_holdings(start, count, &mut frame)?;
        let expected = 5 + 2 * usize::from(count);
        let response = self.transact(&mut request, &frame, expected)?;
        Ok(response[3..response.len() - 2]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn write_coil(&mut self, unit: u8, address: u16, value: bool) -> Result<(), ModbusError> {
        let mut request = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut frame = Vec::with_capacity(8);
        request.generate_set_coil(address, value, &mut frame)?;
        self.transact(&mut request, &frame, 8)?;
        Ok(())
    }

    fn write_holding(&mut self, unit: u8, address: u16, value: u16) -> Result<(), ModbusError> {
        let mut request = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut frame = Vec::with_capacity(8);
        request.generate_set_holding(address, value, &mut frame)?;
        self.transact(&mut request, &frame, 8)?;
        Ok(())
    }
}

/// First coil in the least significant bit of the first byte.
fn unpack_bits(data: &[u8], count: u16) -> Vec<bool> {
    data.iter()
        .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .take(usize::from(count))
        .collect()
}

#[derive(Debug, Default)]
struct Bank {
    coils: HashMap<(u8, u16), bool>,
    discretes: HashMap<(u8, u16), bool>,
    holdings: HashMap<(u8, u16), u16>,
    offline: bool,
    reads: usize,
}

/// In-memory slaves; clones share the registers. Unset registers read as
/// zero.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    bank: Arc<Mutex<Bank>>,
}

impl SimulatedTransport {
    /// Make every request fail as a silent slave would.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_coil(&self, unit: u8, address: u16, value: bool) {
        self.lock().coils.insert((unit, address), value);
    }

    pub fn set_discrete(&self, unit: u8, address: u16, value: bool) {
        self.lock().discretes.insert((unit, address), value);
    }

    pub fn set_holding(&self, unit: u8, address: u16, value: u16) {
        self.lock().holdings.insert((unit, address), value);
    }

    #[must_use]
    pub fn coil(&self, unit: u8, address: u16) -> bool {
        self.lock().coils.get(&(unit, address)).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn holding(&self, unit: u8, address: u16) -> u16 {
        self.lock().holdings.get(&(unit, address)).copied().unwrap_or_default()
    }

    /// Number of read requests served.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    fn lock(&self) -> MutexGuard<'_, Bank> {
        self.bank.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn online(&self, unit: u8) -> Result<MutexGuard<'_, Bank>, ModbusError> {
        let bank = self.lock();
        if bank.offline {
            return Err(ModbusError::Offline(format!("unit {unit}")));
        }
        Ok(bank)
    }
}

fn read_range<T: Copy + Default>(
    table: &HashMap<(u8, u16), T>,
    unit: u8,
    start: u16,
    count: u16,
) -> Vec<T> {
    (0..count)
        .map(|offset| {
            table
                .get(&(unit, start.wrapping_add(offset)))
                .copied()
                .unwrap_or_default()
        })
        .collect()
}

impl RegisterTransport for SimulatedTransport {
    fn read_coils(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<bool>, ModbusError> {
        let mut bank = self.online(unit)?;
        bank.reads += 1;
        Ok(read_range(&bank.coils, unit, start, count))
    }

    fn read_discretes(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<bool>, ModbusError> {
        let mut bank = self.online(unit)?;
        bank.reads += 1;
        Ok(read_range(&bank.discretes, unit, start, count))
    }

    fn read_holdings(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<u16>, ModbusError> {
        let mut bank = self.online(unit)?;
        bank.reads += 1;
        Ok(read_range(&bank.holdings, unit, start, count))
    }

    fn write_coil(&mut self, unit: u8, address: u16, value: bool) -> Result<(), ModbusError> {
        self.online(unit)?.coils.insert((unit, address), value);
        Ok(())
    }

    fn write_holding(&mut self, unit: u8, address: u16, value: u16) -> Result<(), ModbusError> {
        self.online(unit)?.holdings.insert((unit, address), value);
        Ok(())
    }
}
