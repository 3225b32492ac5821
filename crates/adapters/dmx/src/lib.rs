//! # uhab-adapter-dmx
//!
//! DMX512 binding. Items drive one or more channels of a named interface;
//! ON and OFF apply configured levels, optionally fading the first channel,
//! START sweeps it up and down until STOP, and a number sets a percentage.
//!
//! ## Item configuration
//!
//! ```text
//! dmx=<device>:<channel>,<channel>… ON=<fade ms>:<level>,… OFF=<fade ms>:<level>,…
//! ```
//!
//! After every command the item receives its new level as a percentage.
//! Each interface gets a full frame every `poll_ms` and right after a
//! command; fader steps reach the wire with the next frame.
//!
//! ## Dependency rule
//!
//! Depends on `uhab-app` (port traits) and `uhab-domain` only.

pub mod config;
pub mod error;
pub mod fader;
pub mod fixture;
pub mod port;

mod driver;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use uhab_app::bus::Bus;
use uhab_app::poll_loop::{CommandQueue, PollWorker};
use uhab_app::ports::Binding;
use uhab_app::repository::Item;
use uhab_domain::binding_config::BindingConfig;
use uhab_domain::error::{HubError, NotFoundError};
use uhab_domain::item::ItemId;
use uhab_domain::state::ItemState;

pub use config::{Connection, DmxConfig, DmxDeviceConfig};
pub use error::DmxError;
pub use port::{DmxPort, MemoryPort, PortFactory};

use driver::{DmxDriver, Execute, FadeTiming, Output};
use fixture::{Fixture, FixtureConfig};

struct Running {
    queue: CommandQueue<Execute>,
    worker: JoinHandle<()>,
}

/// The DMX binding.
pub struct DmxBinding {
    config: DmxConfig,
    open_port: PortFactory,
    fixtures: Mutex<HashMap<ItemId, Arc<Fixture>>>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for DmxBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmxBinding")
            .field("devices", &self.config.devices.keys().collect::<Vec<_>>())
            .field("items", &self.lock_fixtures().len())
            .finish_non_exhaustive()
    }
}

impl DmxBinding {
    #[must_use]
    pub fn new(config: DmxConfig) -> Self {
        let open_port = port::default_factory(config.break_time());
        Self {
            config,
            open_port,
            fixtures: Mutex::new(HashMap::new()),
            running: Mutex::new(None),
        }
    }

    /// Replace the way interfaces are opened.
    #[must_use]
    pub fn with_port_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str, &DmxDeviceConfig) -> Result<Box<dyn DmxPort>, DmxError> + Send + Sync + 'static,
    {
        self.open_port = Arc::new(factory);
        self
    }

    /// Current channel levels of a configured item.
    #[must_use]
    pub fn channel_values(&self, item: ItemId) -> Option<Vec<u8>> {
        self.lock_fixtures().get(&item).map(|f| f.values())
    }

    fn lock_fixtures(&self) -> MutexGuard<'_, HashMap<ItemId, Arc<Fixture>>> {
        self.fixtures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timing(&self) -> FadeTiming {
        FadeTiming {
            tick: self.config.fadetick(),
            periodical_fadetime: self.config.periodical_fadetime(),
            periodical_update: self.config.periodical_update(),
        }
    }

    fn open_outputs(&self) -> Result<Vec<Output>, DmxError> {
        let fixtures = self.lock_fixtures();
        let mut outputs = Vec::new();
        for (name, device) in &self.config.devices {
            let mut used: Vec<Arc<Fixture>> = fixtures
                .values()
                .filter(|f| &f.device == name)
                .cloned()
                .collect();
            if used.is_empty() {
                continue;
            }
            used.sort_by_key(|f| f.item);
            let highest = used
                .iter()
                .flat_map(|f| f.channels.iter().copied())
                .max()
                .unwrap_or_default();
            let port = (self.open_port)(name, device)?;
            let length = usize::from(highest.max(device.min_channels));
            tracing::info!(device = %name, connection = %device.connection, channels = length, "DMX interface ready");
            outputs.push(Output {
                name: name.clone(),
                port,
                interval: self.config.poll_interval(),
                length,
                fixtures: used,
            });
        }
        Ok(outputs)
    }
}

impl Binding for DmxBinding {
    fn name(&self) -> &'static str {
        "dmx"
    }

    fn label(&self) -> &'static str {
        "DMX protocol"
    }

    fn init(&self) -> Result<(), HubError> {
        self.config.validate()?;
        tracing::debug!(
            poll = ?self.config.poll_interval(),
            fadetick = ?self.config.fadetick(),
            periodical_fadetime = ?self.config.periodical_fadetime(),
            "DMX binding initialised"
        );
        Ok(())
    }

    fn deinit(&self) -> Result<(), HubError> {
        if let Some(running) = self.lock_running().take() {
            running.worker.abort();
        }
        for fixture in self.lock_fixtures().drain().map(|(_, f)| f) {
            fixture.lock().cancel_fade();
        }
        Ok(())
    }

    fn start(&self, bus: &Bus) -> Result<(), HubError> {
        let outputs = self.open_outputs()?;
        if outputs.is_empty() {
            tracing::info!("no DMX items configured");
            return Ok(());
        }
        let (queue, receiver) = CommandQueue::bounded("DMX command queue", self.config.queue_size);
        let driver = DmxDriver::new(bus.clone(), self.timing(), outputs);
        let worker = PollWorker::new(driver, receiver).spawn();
        if let Some(previous) = self.lock_running().replace(Running { queue, worker }) {
            previous.worker.abort();
        }
        Ok(())
    }

    fn configure(&self, item: &Item, config: &BindingConfig) -> Result<(), HubError> {
        let fixture = FixtureConfig::parse(config, self.config.fadetick())?;
        if !self.config.devices.contains_key(&fixture.device) {
            return Err(DmxError::UnknownDevice(fixture.device).into());
        }
        tracing::debug!(item = %item.name(), device = %fixture.device, channels = ?fixture.channels, "DMX item configured");
        self.lock_fixtures()
            .insert(item.id(), Arc::new(Fixture::new(item.id(), item.name(), fixture)));
        Ok(())
    }

    fn send_command(&self, _bus: &Bus, item: &Item, state: &ItemState) -> Result<(), HubError> {
        if !self.lock_fixtures().contains_key(&item.id()) {
            return Err(NotFoundError::new("DMX item", item.name()).into());
        }
        let running = self.lock_running();
        let running = running.as_ref().ok_or(HubError::Closed("DMX binding"))?;
        running.queue.push(Execute {
            item: item.id(),
            state: state.clone(),
        })
    }
}
