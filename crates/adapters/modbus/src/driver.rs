//! The Modbus side of the poll loop.

use std::time::Duration;

use uhab_app::bus::Bus;
use uhab_app::poll_loop::PollDriver;
use uhab_domain::item::ItemId;
use uhab_domain::state::{Command, ItemState};

use crate::config::{ModbusDeviceConfig, RegisterKind};
use crate::error::ModbusError;
use crate::transport::RegisterTransport;

/// A write queued by [`crate::ModbusBinding::send_command`].
#[derive(Debug, Clone)]
pub(crate) struct Write {
    pub item: ItemId,
    pub state: ItemState,
}

/// An item mapped onto one register of a device.
pub(crate) struct Point {
    pub item: ItemId,
    pub name: String,
    pub index: u16,
    /// Last value reported to the bus.
    pub last: Option<ItemState>,
}

pub(crate) struct Device {
    pub name: String,
    pub config: ModbusDeviceConfig,
    pub interval: Duration,
    pub transport: usize,
    pub points: Vec<Point>,
}

enum Reading {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
}

pub(crate) struct ModbusDriver {
    bus: Bus,
    transports: Vec<Box<dyn RegisterTransport>>,
    devices: Vec<Device>,
}

impl ModbusDriver {
    pub fn new(bus: Bus, transports: Vec<Box<dyn RegisterTransport>>, devices: Vec<Device>) -> Self {
        Self {
            bus,
            transports,
            devices,
        }
    }

    fn locate(&self, item: ItemId) -> Option<(usize, usize)> {
        self.devices.iter().enumerate().find_map(|(d, device)| {
            device
                .points
                .iter()
                .position(|p| p.item == item)
                .map(|p| (d, p))
        })
    }

    /// Write `state` and return the value the device now holds.
    fn write(&mut self, device: usize, point: usize, state: &ItemState) -> Result<ItemState, ModbusError> {
        let Device {
            name,
            config,
            transport,
            points,
            ..
        } = &self.devices[device];
        let transport = &mut self.transports[*transport];
        let address = config.start.saturating_add(points[point].index);
        match config.kind {
            RegisterKind::Coil => {
                let command = match state {
                    ItemState::Command(command @ (Command::On | Command::Off)) => *command,
                    other => return Err(ModbusError::Unsupported(format!("{other} to a coil"))),
                };
                transport.write_coil(config.id, address, command == Command::On)?;
                Ok(ItemState::Command(command))
            }
            RegisterKind::Holding => {
                let value = state
                    .as_number()
                    .ok()
                    .filter(|v| (0.0..=f64::from(u16::MAX)).contains(v))
                    .ok_or_else(|| ModbusError::Unsupported(format!("{state} to a holding register")))?;
                let value = register_value(value);
                transport.write_holding(config.id, address, value)?;
                Ok(ItemState::Number(f64::from(value)))
            }
            RegisterKind::Discrete => Err(ModbusError::ReadOnly(name.clone())),
        }
    }

    fn read(&mut self, device: usize) -> Result<Reading, ModbusError> {
        let device = &self.devices[device];
        let transport = &mut self.transports[device.transport];
        let ModbusDeviceConfig {
            id, start, length, ..
        } = device.config;
        Ok(match device.config.kind {
            RegisterKind::Coil => Reading::Bits(transport.read_coils(id, start, length)?),
            RegisterKind::Discrete => Reading::Bits(transport.read_discretes(id, start, length)?),
            RegisterKind::Holding => Reading::Registers(transport.read_holdings(id, start, length)?),
        })
    }

    fn report(&mut self, device: usize, point: usize, state: ItemState) {
        let point = &mut self.devices[device].points[point];
        match self.bus.update(point.item, &state) {
            Ok(()) => point.last = Some(state),
            Err(err) => tracing::warn!(%err, item = %point.name, "failed to report Modbus value"),
        }
    }
}

impl PollDriver for ModbusDriver {
    type Command = Write;

    fn name(&self) -> &'static str {
        "modbus"
    }

    fn poll_intervals(&self) -> Vec<Duration> {
        self.devices.iter().map(|d| d.interval).collect()
    }

    fn apply(&mut self, command: Write) -> Option<usize> {
        let (device, point) = self.locate(command.item)?;
        match self.write(device, point, &command.state) {
            Ok(confirmed) => self.report(device, point, confirmed),
            Err(err) => tracing::warn!(
                %err,
                item = %self.devices[device].points[point].name,
                device = %self.devices[device].name,
                "Modbus write failed"
            ),
        }
        Some(device)
    }

    fn poll(&mut self, device: usize) {
        let reading = match self.read(device) {
            Ok(reading) => reading,
            Err(err) => {
                tracing::warn!(%err, device = %self.devices[device].name, "Modbus poll failed");
                return;
            }
        };
        for point in 0..self.devices[device].points.len() {
            let index = usize::from(self.devices[device].points[point].index);
            let state = match &reading {
                Reading::Bits(bits) => bits.get(index).map(|on| {
                    ItemState::Command(if *on { Command::On } else { Command::Off })
                }),
                Reading::Registers(registers) => {
                    registers.get(index).map(|v| ItemState::Number(f64::from(*v)))
                }
            };
            let Some(state) = state else { continue };
            let changed = self.devices[device].points[point]
                .last
                .as_ref()
                .is_none_or(|last| last.is_changed(&state));
            if changed {
                self.report(device, point, state);
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn register_value(value: f64) -> u16 {
    value.round() as u16
}
