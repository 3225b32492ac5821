//! # uhab-adapter-virtual
//!
//! Virtual binding: every command sent to a bound item is confirmed back
//! through the bus unchanged, as a device that always obeys would.
//!
//! ## Item configuration
//!
//! | Binding line | Behaviour |
//! |--------------|-----------|
//! | `virtual` | Echoes commands |
//! | `virtual initial=ON` | Echoes commands and publishes `ON` when the binding starts |
//!
//! ## Dependency rule
//!
//! Depends on `uhab-app` (port traits) and `uhab-domain` only.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uhab_app::bus::Bus;
use uhab_app::ports::Binding;
use uhab_app::repository::Item;
use uhab_domain::binding_config::BindingConfig;
use uhab_domain::error::{ConfigError, HubError, NotFoundError};
use uhab_domain::item::ItemId;
use uhab_domain::state::ItemState;

#[derive(Debug, Clone)]
struct VirtualItem {
    name: String,
    initial: Option<ItemState>,
    echoed: usize,
}

/// Binding that simulates obedient devices.
#[derive(Debug, Default)]
pub struct VirtualBinding {
    items: Mutex<HashMap<ItemId, VirtualItem>>,
}

impl VirtualBinding {
    /// Number of commands echoed for `item`.
    #[must_use]
    pub fn echoed(&self, item: ItemId) -> usize {
        self.lock().get(&item).map_or(0, |v| v.echoed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemId, VirtualItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Binding for VirtualBinding {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn label(&self) -> &'static str {
        "Virtual devices"
    }

    fn init(&self) -> Result<(), HubError> {
        Ok(())
    }

    fn deinit(&self) -> Result<(), HubError> {
        self.lock().clear();
        Ok(())
    }

    fn start(&self, bus: &Bus) -> Result<(), HubError> {
        let items = self.lock();
        for (id, item) in items.iter() {
            if let Some(initial) = &item.initial {
                tracing::debug!(item = %item.name, state = %initial, "publishing initial state");
                bus.update(*id, initial)?;
            }
        }
        Ok(())
    }

    fn configure(&self, item: &Item, config: &BindingConfig) -> Result<(), HubError> {
        let mut initial = None;
        for option in config.options() {
            match option.key.to_ascii_lowercase().as_str() {
                "initial" => {
                    let text = option
                        .value
                        .clone()
                        .or_else(|| option.params.first().cloned())
                        .ok_or_else(|| ConfigError::MissingKey("initial".into()))?;
                    initial = Some(ItemState::parse(&text));
                }
                other => return Err(ConfigError::Unsupported(format!("unknown option `{other}`")).into()),
            }
        }
        self.lock().insert(
            item.id(),
            VirtualItem {
                name: item.name().to_string(),
                initial,
                echoed: 0,
            },
        );
        Ok(())
    }

    fn send_command(&self, bus: &Bus, item: &Item, state: &ItemState) -> Result<(), HubError> {
        {
            let mut items = self.lock();
            let entry = items
                .get_mut(&item.id())
                .ok_or_else(|| NotFoundError::new("Virtual item", item.name()))?;
            entry.echoed += 1;
        }
        bus.update(item.id(), state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use uhab_app::automation::NoRules;
    use uhab_app::binding_registry::BindingRegistry;
    use uhab_app::config::BusConfig;
    use uhab_app::repository::Repository;
    use uhab_domain::item::{ItemDefinition, ItemKind};
    use uhab_domain::state::Command;

    fn setup(definitions: Vec<ItemDefinition>) -> (Arc<VirtualBinding>, Bus) {
        let binding = Arc::new(VirtualBinding::default());
        let mut registry = BindingRegistry::new(vec![binding.clone() as Arc<dyn Binding>]);
        registry.init_all();
        let repository = Arc::new(
            Repository::builder()
                .items(definitions)
                .build(&registry)
                .unwrap(),
        );
        let (bus, _handle) = Bus::start(repository, Arc::new(NoRules), BusConfig::default());
        registry.start_all(&bus);
        (binding, bus)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn should_echo_toggles_back_through_bus() {
        let (binding, bus) = setup(vec![
            ItemDefinition::new("lamp", ItemKind::Switch).with_binding("virtual"),
        ]);
        let lamp = bus.repository().find("lamp").unwrap().id();

        let mut expected = Command::Off;
        for _ in 0..4 {
            bus.send(lamp, &ItemState::Command(Command::Toggle)).unwrap();
            settle().await;
            expected = expected.toggled();
            assert_eq!(bus.repository().command(lamp).unwrap(), expected);
        }
        assert_eq!(binding.echoed(lamp), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn should_publish_initial_state_on_start() {
        let (_binding, bus) = setup(vec![
            ItemDefinition::new("level", ItemKind::Dimmer).with_binding("virtual initial=40"),
        ]);
        settle().await;
        let level = bus.repository().find("level").unwrap().id();
        assert_eq!(bus.repository().number(level).unwrap(), 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn should_leave_item_unbound_on_unknown_option() {
        let (_binding, bus) = setup(vec![
            ItemDefinition::new("lamp", ItemKind::Switch).with_binding("virtual colour=red"),
        ]);
        assert!(bus.repository().find("lamp").unwrap().binding().is_none());
    }
}
