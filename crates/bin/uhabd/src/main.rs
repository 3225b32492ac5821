//! # uhabd
//!
//! Composition root that wires the bindings, the item repository, the rules
//! and the state store around the virtual bus, then runs until interrupted.
//!
//! ## Responsibilities
//! - Load `uhab.toml` and environment overrides
//! - Initialise the enabled bindings and build the item repository
//! - Restore item states from `SQLite` and snapshot them periodically
//! - Start the bus, the bindings and the rule processor
//! - Shut down in order on SIGINT: final snapshot, STOP events, bus, bindings
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no domain logic belongs here.

mod config;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

use uhab_adapter_dmx::DmxBinding;
use uhab_adapter_modbus::ModbusBinding;
use uhab_adapter_storage_sqlite_sqlx::SqliteStateStore;
use uhab_adapter_virtual::VirtualBinding;
use uhab_app::automation::DeclarativeRules;
use uhab_app::binding_registry::BindingRegistry;
use uhab_app::bus::Bus;
use uhab_app::persistence;
use uhab_app::ports::Binding;
use uhab_app::repository::Repository;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Bindings
    let mut bindings: Vec<Arc<dyn Binding>> = Vec::new();
    if !config.dmx.devices.is_empty() {
        bindings.push(Arc::new(DmxBinding::new(config.dmx.clone())));
    }
    if !config.modbus.devices.is_empty() {
        bindings.push(Arc::new(ModbusBinding::new(config.modbus.clone())));
    }
    if config.virtual_binding.enabled {
        bindings.push(Arc::new(VirtualBinding::default()));
    }
    let mut registry = BindingRegistry::new(bindings);
    let initialised = registry.init_all();

    // Items
    let repository = Arc::new(
        Repository::builder()
            .items(config.items.iter().cloned())
            .build(&registry)?,
    );
    tracing::info!(items = repository.len(), bindings = initialised, "repository built");

    // State store
    let store = if config.persistence.enabled {
        let db = uhab_adapter_storage_sqlite_sqlx::Config {
            database_url: config.database_url().to_string(),
        }
        .build()
        .await?;
        let store = SqliteStateStore::new(db.pool().clone());
        persistence::restore(&repository, &store).await?;
        Some(store)
    } else {
        None
    };

    // Bus
    let rules = DeclarativeRules::compile(&repository, &config.rules)?;
    tracing::info!(rules = rules.len(), "rules compiled");
    let (bus, worker) = Bus::start(Arc::clone(&repository), Arc::new(rules), config.bus.clone());
    let started = registry.start_all(&bus);
    bus.announce_start()?;
    tracing::info!(bindings = started, "uhab running");

    let snapshots = store
        .clone()
        .map(|store| spawn_snapshots(Arc::clone(&repository), store, config.persistence_interval()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    if let Some(task) = snapshots {
        task.abort();
    }
    if let Some(store) = &store
        && let Err(err) = persistence::persist(&repository, store).await
    {
        tracing::error!(%err, "final state snapshot failed");
    }
    bus.shutdown().await?;
    worker.await?;
    registry.deinit_all();
    tracing::info!("uhab stopped");

    Ok(())
}

fn spawn_snapshots(
    repository: Arc<Repository>,
    store: SqliteStateStore,
    period: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = persistence::persist(&repository, &store).await {
                tracing::warn!(%err, "state snapshot failed");
            }
        }
    })
}
