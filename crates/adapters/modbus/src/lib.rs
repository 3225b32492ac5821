//! # uhab-adapter-modbus
//!
//! Modbus RTU binding. Each configured device is a register range of one
//! slave; items map onto a register of that range by index.
//!
//! | Device type | Item state | Writable |
//! |-------------|------------|----------|
//! | `coil` | ON / OFF | yes |
//! | `discrete` | ON / OFF | no |
//! | `holding` | number | yes |
//!
//! ## Item configuration
//!
//! ```text
//! modbus=<device>:<index>
//! ```
//!
//! Writes are reported once the slave acknowledges them. Polls report only
//! values that differ from the last one reported.
//!
//! ## Dependency rule
//!
//! Depends on `uhab-app` (port traits) and `uhab-domain` only.

pub mod config;
pub mod error;
pub mod transport;

mod driver;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use uhab_app::bus::Bus;
use uhab_app::poll_loop::{CommandQueue, PollWorker};
use uhab_app::ports::Binding;
use uhab_app::repository::Item;
use uhab_domain::binding_config::BindingConfig;
use uhab_domain::error::{ConfigError, HubError, NotFoundError};
use uhab_domain::item::ItemId;
use uhab_domain::state::ItemState;

pub use config::{ModbusConfig, ModbusConnection, ModbusDeviceConfig, RegisterKind};
pub use error::ModbusError;
pub use transport::{RegisterTransport, SimulatedTransport, TransportFactory};

use driver::{Device, ModbusDriver, Point, Write};

#[derive(Debug, Clone)]
struct PointConfig {
    item: ItemId,
    name: String,
    device: String,
    index: u16,
}

struct Running {
    queue: CommandQueue<Write>,
    worker: JoinHandle<()>,
}

/// The Modbus binding.
pub struct ModbusBinding {
    config: ModbusConfig,
    open_transport: TransportFactory,
    points: Mutex<Vec<PointConfig>>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for ModbusBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusBinding")
            .field("devices", &self.config.devices.keys().collect::<Vec<_>>())
            .field("points", &self.lock_points().len())
            .finish_non_exhaustive()
    }
}

impl ModbusBinding {
    #[must_use]
    pub fn new(config: ModbusConfig) -> Self {
        Self {
            config,
            open_transport: transport::default_factory(),
            points: Mutex::new(Vec::new()),
            running: Mutex::new(None),
        }
    }

    /// Replace the way lines are opened.
    #[must_use]
    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ModbusConnection) -> Result<Box<dyn RegisterTransport>, ModbusError>
            + Send
            + Sync
            + 'static,
    {
        self.open_transport = Arc::new(factory);
        self
    }

    fn lock_points(&self) -> MutexGuard<'_, Vec<PointConfig>> {
        self.points.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open one transport per distinct line and group points by device.
    fn open_devices(&self) -> Result<(Vec<Box<dyn RegisterTransport>>, Vec<Device>), ModbusError> {
        let points = self.lock_points();
        let mut lines: Vec<&ModbusConnection> = Vec::new();
        let mut transports = Vec::new();
        let mut devices = Vec::new();
        for (name, config) in &self.config.devices {
            let used: Vec<Point> = points
                .iter()
                .filter(|p| &p.device == name)
                .map(|p| Point {
                    item: p.item,
                    name: p.name.clone(),
                    index: p.index,
                    last: None,
                })
                .collect();
            if used.is_empty() {
                continue;
            }
            let transport = if let Some(index) = lines.iter().position(|c| **c == config.connection) {
                index
            } else {
                transports.push((self.open_transport)(&config.connection)?);
                lines.push(&config.connection);
                transports.len() - 1
            };
            tracing::info!(
                device = %name,
                connection = %config.connection,
                kind = %config.kind,
                items = used.len(),
                "Modbus device ready"
            );
            devices.push(Device {
                name: name.clone(),
                config: config.clone(),
                interval: self.config.poll_interval(config),
                transport,
                points: used,
            });
        }
        Ok((transports, devices))
    }
}

impl Binding for ModbusBinding {
    fn name(&self) -> &'static str {
        "modbus"
    }

    fn label(&self) -> &'static str {
        "MODBUS protocol"
    }

    fn init(&self) -> Result<(), HubError> {
        self.config.validate()?;
        Ok(())
    }

    fn deinit(&self) -> Result<(), HubError> {
        if let Some(running) = self.lock_running().take() {
            running.worker.abort();
        }
        self.lock_points().clear();
        Ok(())
    }

    fn start(&self, bus: &Bus) -> Result<(), HubError> {
        let (transports, devices) = self.open_devices()?;
        if devices.is_empty() {
            tracing::info!("no Modbus items configured");
            return Ok(());
        }
        let (queue, receiver) = CommandQueue::bounded("Modbus command queue", self.config.queue_size);
        let driver = ModbusDriver::new(bus.clone(), transports, devices);
        let worker = PollWorker::new(driver, receiver).spawn();
        if let Some(previous) = self.lock_running().replace(Running { queue, worker }) {
            previous.worker.abort();
        }
        Ok(())
    }

    fn configure(&self, item: &Item, config: &BindingConfig) -> Result<(), HubError> {
        let head = config.head();
        let device = head
            .value
            .clone()
            .ok_or_else(|| ConfigError::MissingKey("modbus device".into()))?;
        let index = head
            .param::<u16>(0)?
            .ok_or_else(|| ConfigError::MissingKey("modbus index".into()))?;
        let length = self
            .config
            .devices
            .get(&device)
            .ok_or_else(|| ModbusError::UnknownDevice(device.clone()))?
            .length;
        if index >= length {
            return Err(ModbusError::IndexRange {
                device,
                index,
                length,
            }
            .into());
        }
        tracing::debug!(item = %item.name(), device = %device, index, "Modbus item configured");
        self.lock_points().push(PointConfig {
            item: item.id(),
            name: item.name().to_string(),
            device,
            index,
        });
        Ok(())
    }

    fn send_command(&self, _bus: &Bus, item: &Item, state: &ItemState) -> Result<(), HubError> {
        let device = self
            .lock_points()
            .iter()
            .find(|p| p.item == item.id())
            .map(|p| p.device.clone())
            .ok_or_else(|| NotFoundError::new("Modbus item", item.name()))?;
        if self
            .config
            .devices
            .get(&device)
            .is_some_and(|d| d.kind == RegisterKind::Discrete)
        {
            return Err(ModbusError::ReadOnly(device).into());
        }
        let running = self.lock_running();
        let running = running.as_ref().ok_or(HubError::Closed("Modbus binding"))?;
        running.queue.push(Write {
            item: item.id(),
            state: state.clone(),
        })
    }
}
