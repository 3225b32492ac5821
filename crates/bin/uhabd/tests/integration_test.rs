//! End-to-end tests for the wired uhab stack.
//!
//! Each test builds the same pieces `uhabd` assembles (bindings, item
//! repository, declarative rules, bus) from a TOML fragment, with in-memory
//! DMX ports and simulated Modbus slaves standing in for the serial lines.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;

use uhab_adapter_dmx::{Connection, DmxBinding, DmxConfig, DmxDeviceConfig, DmxPort, MemoryPort};
use uhab_adapter_modbus::{
    ModbusBinding, ModbusConfig, ModbusConnection, ModbusDeviceConfig, RegisterKind,
    RegisterTransport, SimulatedTransport,
};
use uhab_adapter_storage_sqlite_sqlx::{Config, SqliteStateStore};
use uhab_adapter_virtual::VirtualBinding;
use uhab_app::automation::DeclarativeRules;
use uhab_app::binding_registry::BindingRegistry;
use uhab_app::bus::Bus;
use uhab_app::config::BusConfig;
use uhab_app::persistence;
use uhab_app::ports::{Binding, ItemSet};
use uhab_app::repository::Repository;
use uhab_app::wait_registry::WaitOutcome;
use uhab_domain::error::HubError;
use uhab_domain::item::{ItemDefinition, ItemId};
use uhab_domain::rule::RuleDefinition;
use uhab_domain::state::{Command, ItemState};

#[derive(Deserialize)]
struct Layout {
    #[serde(default)]
    items: Vec<ItemDefinition>,
    #[serde(default)]
    rules: Vec<RuleDefinition>,
}

struct Hub {
    bus: Bus,
    registry: BindingRegistry,
    worker: JoinHandle<()>,
}

impl Hub {
    fn id(&self, name: &str) -> ItemId {
        self.bus.repository().find(name).unwrap().id()
    }

    fn state(&self, name: &str) -> ItemState {
        self.bus.repository().state(self.id(name)).unwrap()
    }

    fn press(&self, name: &str, command: Command) {
        self.bus
            .update(self.id(name), &ItemState::Command(command))
            .unwrap();
    }
}

/// Wire `bindings` and the items and rules of `layout` the way the daemon does.
fn hub(bindings: Vec<Arc<dyn Binding>>, layout: &str) -> Hub {
    let layout: Layout = toml::from_str(layout).expect("layout should parse");
    let mut registry = BindingRegistry::new(bindings);
    registry.init_all();
    let repository = Arc::new(
        Repository::builder()
            .items(layout.items)
            .build(&registry)
            .expect("repository should build"),
    );
    let rules = DeclarativeRules::compile(&repository, &layout.rules).expect("rules should compile");
    let (bus, worker) = Bus::start(repository, Arc::new(rules), BusConfig::default());
    registry.start_all(&bus);
    bus.announce_start().unwrap();
    Hub {
        bus,
        registry,
        worker,
    }
}

async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ---------------------------------------------------------------------------
// Rules and the virtual binding
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn should_toggle_virtual_lamp_on_each_click() {
    let virtual_binding = Arc::new(VirtualBinding::default());
    let hub = hub(
        vec![virtual_binding.clone() as Arc<dyn Binding>],
        r#"
        [[items]]
        name = "button"
        kind = "contact"

        [[items]]
        name = "lamp"
        kind = "switch"
        binding = "virtual"

        [[rules]]
        item = "button"
        event = "CLICK"
        target = "lamp"
        state = "TOGGLE"
        "#,
    );

    hub.press("button", Command::On);
    wait(50).await;
    hub.press("button", Command::Off);
    wait(1000).await;
    assert_eq!(hub.state("lamp"), ItemState::Command(Command::On));

    hub.press("button", Command::On);
    wait(50).await;
    hub.press("button", Command::Off);
    wait(1000).await;
    assert_eq!(hub.state("lamp"), ItemState::Command(Command::Off));
    assert_eq!(virtual_binding.echoed(hub.id("lamp")), 2);
}

#[tokio::test(start_paused = true)]
async fn should_publish_initial_states_and_fire_start_rules() {
    let hub = hub(
        vec![Arc::new(VirtualBinding::default()) as Arc<dyn Binding>],
        r#"
        [[items]]
        name = "mode"
        kind = "string"
        binding = "virtual initial=away"

        [[items]]
        name = "porch"
        kind = "switch"

        [[rules]]
        item = "mode"
        event = "START"
        target = "porch"
        state = "ON"
        "#,
    );
    wait(10).await;

    assert_eq!(hub.state("mode"), ItemState::String(Some("away".to_string())));
    assert_eq!(hub.state("porch"), ItemState::Command(Command::On));
}

#[tokio::test(start_paused = true)]
async fn should_fan_group_commands_out_to_bound_members() {
    let hub = hub(
        vec![Arc::new(VirtualBinding::default()) as Arc<dyn Binding>],
        r#"
        [[items]]
        name = "downstairs"
        kind = "group"
        children = ["kitchen", "hall"]

        [[items]]
        name = "kitchen"
        kind = "switch"
        binding = "virtual"

        [[items]]
        name = "hall"
        kind = "switch"
        binding = "virtual"
        "#,
    );

    hub.bus
        .send_by_name("downstairs", &ItemState::Command(Command::On))
        .unwrap();
    wait(10).await;

    assert_eq!(hub.state("kitchen"), ItemState::Command(Command::On));
    assert_eq!(hub.state("hall"), ItemState::Command(Command::On));
}

// ---------------------------------------------------------------------------
// DMX
// ---------------------------------------------------------------------------

fn dmx(port: &MemoryPort) -> Arc<DmxBinding> {
    let mut config = DmxConfig::default();
    config.devices.insert(
        "stage".into(),
        DmxDeviceConfig {
            connection: Connection::Memory,
            min_channels: 8,
        },
    );
    let shared = port.clone();
    Arc::new(
        DmxBinding::new(config)
            .with_port_factory(move |_, _| Ok(Box::new(shared.clone()) as Box<dyn DmxPort>)),
    )
}

#[tokio::test(start_paused = true)]
async fn should_fade_dmx_dimmer_from_button_rule() {
    let port = MemoryPort::default();
    let hub = hub(
        vec![dmx(&port) as Arc<dyn Binding>],
        r#"
        [[items]]
        name = "button"
        kind = "contact"

        [[items]]
        name = "spot"
        kind = "dimmer"
        binding = "dmx=stage:1,2 ON=400:255,100 OFF=400:0,0"

        [[rules]]
        item = "button"
        event = "CLICK"
        target = "spot"
        state = "ON"
        "#,
    );

    hub.press("button", Command::On);
    wait(50).await;
    hub.press("button", Command::Off);
    // The click resolves at the longpress deadline; the fade runs after it.
    wait(500).await;
    wait(500).await;

    let frame = port.last_frame().unwrap();
    assert_eq!(frame.len(), 9);
    assert_eq!(&frame[..3], &[0, 255, 100]);
    assert_eq!(hub.state("spot"), ItemState::Number(100.0));
}

// ---------------------------------------------------------------------------
// Modbus and wait-for-changes
// ---------------------------------------------------------------------------

fn modbus(slaves: &SimulatedTransport) -> Arc<ModbusBinding> {
    let mut config = ModbusConfig {
        poll_ms: 100,
        ..ModbusConfig::default()
    };
    config.devices.insert(
        "inputs".into(),
        ModbusDeviceConfig {
            connection: ModbusConnection::Simulated,
            kind: RegisterKind::Discrete,
            id: 2,
            start: 0,
            length: 8,
            poll_ms: None,
        },
    );
    let shared = slaves.clone();
    Arc::new(
        ModbusBinding::new(config).with_transport_factory(move |_| {
            Ok(Box::new(shared.clone()) as Box<dyn RegisterTransport>)
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn should_wake_waiter_when_polled_input_changes() {
    let slaves = SimulatedTransport::default();
    let hub = hub(
        vec![modbus(&slaves) as Arc<dyn Binding>],
        r#"
        [[items]]
        name = "door"
        kind = "contact"
        binding = "modbus=inputs:3"
        "#,
    );
    wait(250).await;
    assert_eq!(hub.state("door"), ItemState::Command(Command::Off));

    let scope: ItemSet = [hub.id("door")].into_iter().collect();
    let bus = hub.bus.clone();
    let waiter = tokio::spawn(async move { bus.wait_for_changes(Arc::new(scope)).await });
    wait(10).await;
    slaves.set_discrete(2, 3, true);

    assert_eq!(waiter.await.unwrap(), WaitOutcome::Changed);
    assert_eq!(hub.state("door"), ItemState::Command(Command::On));
}

#[tokio::test(start_paused = true)]
async fn should_time_out_waiter_without_changes() {
    let slaves = SimulatedTransport::default();
    let hub = hub(
        vec![modbus(&slaves) as Arc<dyn Binding>],
        r#"
        [[items]]
        name = "door"
        kind = "contact"
        binding = "modbus=inputs:3"
        "#,
    );
    wait(250).await;

    let scope: ItemSet = [hub.id("door")].into_iter().collect();
    let outcome = hub.bus.wait_for_changes(Arc::new(scope)).await;
    assert_eq!(outcome, WaitOutcome::TimedOut);
}

// ---------------------------------------------------------------------------
// Persistence and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_restore_snapshot_into_fresh_repository() {
    let path = std::env::temp_dir().join(format!("uhab-restore-{}.db", std::process::id()));
    let url = format!("sqlite:{}", path.display());
    let layout = r#"
        [[items]]
        name = "lamp"
        kind = "switch"

        [[items]]
        name = "level"
        kind = "number"
    "#;

    let db = Config {
        database_url: url.clone(),
    }
    .build()
    .await
    .unwrap();
    let store = SqliteStateStore::new(db.pool().clone());

    let first = hub(Vec::new(), layout);
    first.press("lamp", Command::On);
    first
        .bus
        .update(first.id("level"), &ItemState::Number(21.5))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(persistence::persist(first.bus.repository(), &store).await.unwrap(), 2);

    let layout: Layout = toml::from_str(layout).unwrap();
    let registry = BindingRegistry::default();
    let repository = Repository::builder()
        .items(layout.items)
        .build(&registry)
        .unwrap();
    assert_eq!(persistence::restore(&repository, &store).await.unwrap(), 2);

    let lamp = repository.find("lamp").unwrap().id();
    let level = repository.find("level").unwrap().id();
    assert_eq!(repository.command(lamp).unwrap(), Command::On);
    assert_eq!(repository.number(level).unwrap(), 21.5);

    db.pool().close().await;
    let _ = std::fs::remove_file(path);
}

#[tokio::test(start_paused = true)]
async fn should_stop_worker_and_close_bus_on_shutdown() {
    let port = MemoryPort::default();
    let mut hub = hub(
        vec![dmx(&port) as Arc<dyn Binding>],
        r#"
        [[items]]
        name = "spot"
        kind = "dimmer"
        binding = "dmx=stage:1"
        "#,
    );

    hub.bus.shutdown().await.unwrap();
    (&mut hub.worker).await.unwrap();
    hub.registry.deinit_all();

    let spot = hub.id("spot");
    assert!(matches!(
        hub.bus.update(spot, &ItemState::Number(50.0)),
        Err(HubError::Closed(_))
    ));
    assert!(matches!(
        hub.bus.send(spot, &ItemState::Command(Command::On)),
        Err(HubError::NotFound(_))
    ));
}
