//! Item repository: the fixed item set and its runtime state.
//!
//! Static item data (name, kind, children, binding) is immutable after
//! [`RepositoryBuilder::build`]. Runtime data (state, list cursor,
//! last-update stamp) sits behind one lock, the *items lock*. Readers get
//! copies; only the bus worker commits new states.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uhab_domain::binding_config::BindingConfig;
use uhab_domain::error::{HubError, NotFoundError, TypeMismatch, ValidationError};
use uhab_domain::item::{ItemDefinition, ItemId, ItemKind, Stereotype, Timestamp};
use uhab_domain::state::{Command, ItemState};

use crate::binding_registry::BindingRegistry;
use crate::ports::scope::ItemSet;
use crate::ports::state_store::StoredState;
use crate::ports::Binding;

/// Static view of one item.
pub struct Item {
    id: ItemId,
    name: String,
    label: Option<String>,
    kind: ItemKind,
    stereotype: Stereotype,
    children: Vec<ItemId>,
    binding: Option<Arc<dyn Binding>>,
    binding_config: Option<String>,
}

impl Item {
    #[must_use]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label, falling back to the name.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    #[must_use]
    pub fn stereotype(&self) -> Stereotype {
        self.stereotype
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.kind.is_group() && self.stereotype == Stereotype::List
    }

    #[must_use]
    pub fn children(&self) -> &[ItemId] {
        &self.children
    }

    /// The binding this item was successfully configured with.
    #[must_use]
    pub fn binding(&self) -> Option<&Arc<dyn Binding>> {
        self.binding.as_ref()
    }

    #[must_use]
    pub fn binding_config(&self) -> Option<&str> {
        self.binding_config.as_deref()
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("stereotype", &self.stereotype)
            .field("children", &self.children)
            .field("binding", &self.binding.as_ref().map(|b| b.name()))
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct ItemRuntime {
    state: ItemState,
    active_child: Option<usize>,
    last_update: Option<Timestamp>,
}

/// The item set plus its runtime state.
pub struct Repository {
    items: Vec<Item>,
    by_name: HashMap<String, ItemId>,
    runtime: Mutex<Vec<ItemRuntime>>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

impl Repository {
    #[must_use]
    pub fn builder() -> RepositoryBuilder {
        RepositoryBuilder::default()
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `id` is out of range.
    pub fn item(&self, id: ItemId) -> Result<&Item, HubError> {
        self.items
            .get(id.index())
            .ok_or_else(|| NotFoundError::new("Item", id.to_string()).into())
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when no item has this name.
    pub fn find(&self, name: &str) -> Result<&Item, HubError> {
        self.by_name
            .get(name)
            .map(|id| &self.items[id.index()])
            .ok_or_else(|| NotFoundError::new("Item", name).into())
    }

    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of the committed state.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `id` is out of range.
    pub fn state(&self, id: ItemId) -> Result<ItemState, HubError> {
        self.with_runtime(id, |rt| rt.state.clone())
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `id` is out of range and
    /// [`HubError::TypeMismatch`] when the state holds another variant.
    pub fn command(&self, id: ItemId) -> Result<Command, HubError> {
        Ok(self.with_runtime(id, |rt| rt.state.as_command())??)
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `id` is out of range and
    /// [`HubError::TypeMismatch`] when the state holds another variant.
    pub fn number(&self, id: ItemId) -> Result<f64, HubError> {
        Ok(self.with_runtime(id, |rt| rt.state.as_number())??)
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `id` is out of range and
    /// [`HubError::TypeMismatch`] when the state holds another variant.
    pub fn string(&self, id: ItemId) -> Result<Option<String>, HubError> {
        Ok(self.with_runtime(id, |rt| {
            rt.state.as_string().map(|text| text.map(str::to_string))
        })??)
    }

    /// Whether `candidate` differs from the committed state.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `id` is out of range.
    pub fn compare(&self, id: ItemId, candidate: &ItemState) -> Result<bool, HubError> {
        self.with_runtime(id, |rt| rt.state.is_changed(candidate))
    }

    /// The active child of a list group.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `id` is out of range.
    pub fn active_child(&self, id: ItemId) -> Result<Option<ItemId>, HubError> {
        let item = self.item(id)?;
        let cursor = self.with_runtime(id, |rt| rt.active_child)?;
        Ok(cursor.and_then(|index| item.children.get(index).copied()))
    }

    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `id` is out of range.
    pub fn last_update(&self, id: ItemId) -> Result<Option<Timestamp>, HubError> {
        self.with_runtime(id, |rt| rt.last_update)
    }

    /// `root` and every item below it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when `root` is out of range.
    pub fn subtree(&self, root: ItemId) -> Result<ItemSet, HubError> {
        self.item(root)?;
        let mut set = ItemSet::default();
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            if set.insert(id) {
                pending.extend(self.items[id.index()].children.iter().copied());
            }
        }
        Ok(set)
    }

    /// Every item state worth persisting, keyed by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoredState> {
        let runtime = self.lock();
        self.items
            .iter()
            .zip(runtime.iter())
            .filter(|(_, rt)| rt.state != ItemState::None)
            .map(|(item, rt)| (item.name.clone(), rt.state.clone()))
            .collect()
    }

    /// Seed a state from a snapshot. Only states of the item's current
    /// variant are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for unknown names and
    /// [`HubError::TypeMismatch`] when the variant differs.
    pub fn restore(&self, name: &str, state: ItemState) -> Result<(), HubError> {
        let id = self.find(name)?.id;
        let mut runtime = self.lock();
        let current = &mut runtime[id.index()];
        if current.state.kind() != state.kind() {
            return Err(TypeMismatch {
                expected: current.state.kind(),
                actual: state.kind(),
            }
            .into());
        }
        current.state = state;
        Ok(())
    }

    pub(crate) fn commit(&self, id: ItemId, state: ItemState) {
        if let Some(rt) = self.lock().get_mut(id.index()) {
            rt.state = state;
        }
    }

    pub(crate) fn touch(&self, id: ItemId, at: Timestamp) {
        if let Some(rt) = self.lock().get_mut(id.index()) {
            rt.last_update = Some(at);
        }
    }

    pub(crate) fn cursor(&self, id: ItemId) -> Option<usize> {
        self.lock().get(id.index()).and_then(|rt| rt.active_child)
    }

    pub(crate) fn set_cursor(&self, id: ItemId, index: usize) {
        if let Some(rt) = self.lock().get_mut(id.index()) {
            rt.active_child = Some(index);
        }
    }

    fn with_runtime<T>(&self, id: ItemId, f: impl FnOnce(&ItemRuntime) -> T) -> Result<T, HubError> {
        self.item(id)?;
        let runtime = self.lock();
        Ok(f(&runtime[id.index()]))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ItemRuntime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collects item definitions, then resolves and validates them.
#[derive(Debug, Default)]
pub struct RepositoryBuilder {
    definitions: Vec<ItemDefinition>,
}

impl RepositoryBuilder {
    #[must_use]
    pub fn item(mut self, definition: ItemDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    #[must_use]
    pub fn items(mut self, definitions: impl IntoIterator<Item = ItemDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    /// Resolve children, check structure and configure bindings.
    ///
    /// Structural problems are fatal. A binding that is unknown, inactive or
    /// rejects its configuration only leaves that item unbound.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] for empty, duplicate or cyclic
    /// definitions and [`HubError::NotFound`] for unknown children.
    pub fn build(self, bindings: &BindingRegistry) -> Result<Repository, HubError> {
        let mut by_name = HashMap::with_capacity(self.definitions.len());
        for (index, definition) in self.definitions.iter().enumerate() {
            definition.validate()?;
            if by_name
                .insert(definition.name.clone(), ItemId::new(index))
                .is_some()
            {
                return Err(ValidationError::DuplicateName(definition.name.clone()).into());
            }
        }

        let mut items = Vec::with_capacity(self.definitions.len());
        for (index, definition) in self.definitions.into_iter().enumerate() {
            let children = definition
                .children
                .iter()
                .map(|child| {
                    by_name
                        .get(child)
                        .copied()
                        .ok_or_else(|| NotFoundError::new("Item", child.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            items.push(Item {
                id: ItemId::new(index),
                name: definition.name,
                label: definition.label,
                kind: definition.kind,
                stereotype: definition.stereotype,
                children,
                binding: None,
                binding_config: definition.binding,
            });
        }
        check_cycles(&items)?;

        for item in &mut items {
            attach_binding(item, bindings);
        }

        let runtime = items
            .iter()
            .map(|item| ItemRuntime {
                state: item.kind.initial_state(),
                active_child: (item.is_list() && !item.children.is_empty()).then_some(0),
                last_update: None,
            })
            .collect();

        tracing::info!(
            items = items.len(),
            bound = items.iter().filter(|i| i.binding.is_some()).count(),
            "item repository built"
        );
        Ok(Repository {
            items,
            by_name,
            runtime: Mutex::new(runtime),
        })
    }
}

fn attach_binding(item: &mut Item, bindings: &BindingRegistry) {
    let Some(line) = item.binding_config.as_deref() else {
        return;
    };
    let config = match line.parse::<BindingConfig>() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, item = %item.name, "invalid binding line, item left unbound");
            return;
        }
    };
    let Some(binding) = bindings.get_active(config.binding_name()) else {
        tracing::warn!(
            item = %item.name,
            binding = config.binding_name(),
            "binding not available, item left unbound"
        );
        return;
    };
    match binding.configure(item, &config) {
        Ok(()) => {
            tracing::debug!(item = %item.name, binding = binding.name(), "item bound");
            item.binding = Some(Arc::clone(binding));
        }
        Err(err) => {
            tracing::error!(%err, item = %item.name, binding = binding.name(), "binding rejected item configuration");
        }
    }
}

fn check_cycles(items: &[Item]) -> Result<(), ValidationError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(items: &[Item], marks: &mut [Mark], id: ItemId) -> Result<(), ValidationError> {
        match marks[id.index()] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(ValidationError::GroupCycle(items[id.index()].name.clone()));
            }
            Mark::Unvisited => {}
        }
        marks[id.index()] = Mark::InProgress;
        for &child in &items[id.index()].children {
            visit(items, marks, child)?;
        }
        marks[id.index()] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; items.len()];
    for item in items {
        visit(items, &mut marks, item.id)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::bus::Bus;
    use uhab_domain::error::ConfigError;

    /// Accepts every item whose binding line has a value, records sends.
    #[derive(Default)]
    pub(crate) struct RecordingBinding {
        pub(crate) configured: Mutex<Vec<String>>,
        pub(crate) sent: Mutex<Vec<(String, ItemState)>>,
    }

    impl Binding for RecordingBinding {
        fn name(&self) -> &'static str {
            "rec"
        }

        fn label(&self) -> &'static str {
            "Recording"
        }

        fn init(&self) -> Result<(), HubError> {
            Ok(())
        }

        fn deinit(&self) -> Result<(), HubError> {
            Ok(())
        }

        fn start(&self, _bus: &Bus) -> Result<(), HubError> {
            Ok(())
        }

        fn configure(&self, item: &Item, config: &BindingConfig) -> Result<(), HubError> {
            if config.head().value.is_none() {
                return Err(ConfigError::MissingKey("rec".into()).into());
            }
            self.configured.lock().unwrap().push(item.name().to_string());
            Ok(())
        }

        fn send_command(&self, _bus: &Bus, item: &Item, state: &ItemState) -> Result<(), HubError> {
            self.sent
                .lock()
                .unwrap()
                .push((item.name().to_string(), state.clone()));
            Ok(())
        }
    }

    pub(crate) fn registry_with(binding: Arc<RecordingBinding>) -> BindingRegistry {
        let mut registry = BindingRegistry::new(vec![binding as Arc<dyn Binding>]);
        registry.init_all();
        registry
    }

    #[test]
    fn should_pre_type_states_and_resolve_children() {
        let repo = Repository::builder()
            .item(ItemDefinition::new("lamp", ItemKind::Switch))
            .item(ItemDefinition::new("level", ItemKind::Dimmer))
            .item(ItemDefinition::new("all", ItemKind::Group).with_children(["lamp", "level"]))
            .build(&BindingRegistry::default())
            .unwrap();

        let lamp = repo.find("lamp").unwrap().id();
        let all = repo.find("all").unwrap();
        assert_eq!(repo.command(lamp).unwrap(), Command::Off);
        assert_eq!(repo.number(repo.find("level").unwrap().id()).unwrap(), 0.0);
        assert_eq!(all.children().len(), 2);
        assert!(repo.last_update(lamp).unwrap().is_none());
    }

    #[test]
    fn should_fail_typed_read_on_other_variant() {
        let repo = Repository::builder()
            .item(ItemDefinition::new("lamp", ItemKind::Switch))
            .build(&BindingRegistry::default())
            .unwrap();
        let err = repo.number(ItemId::new(0)).unwrap_err();
        assert!(matches!(err, HubError::TypeMismatch(_)));
    }

    #[test]
    fn should_reject_unknown_child() {
        let err = Repository::builder()
            .item(ItemDefinition::new("all", ItemKind::Group).with_children(["ghost"]))
            .build(&BindingRegistry::default())
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound(ref e) if e.id == "ghost"));
    }

    #[test]
    fn should_reject_duplicate_names() {
        let err = Repository::builder()
            .item(ItemDefinition::new("lamp", ItemKind::Switch))
            .item(ItemDefinition::new("lamp", ItemKind::Contact))
            .build(&BindingRegistry::default())
            .unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::DuplicateName(_))
        ));
    }

    #[test]
    fn should_reject_group_cycles() {
        let err = Repository::builder()
            .item(ItemDefinition::new("a", ItemKind::Group).with_children(["b"]))
            .item(ItemDefinition::new("b", ItemKind::Group).with_children(["a"]))
            .build(&BindingRegistry::default())
            .unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::GroupCycle(_))
        ));
    }

    #[test]
    fn should_bind_configured_items_and_leave_rejected_ones_unbound() {
        let binding = Arc::new(RecordingBinding::default());
        let repo = Repository::builder()
            .item(ItemDefinition::new("good", ItemKind::Switch).with_binding("rec=dev:1"))
            .item(ItemDefinition::new("bad", ItemKind::Switch).with_binding("rec"))
            .item(ItemDefinition::new("other", ItemKind::Switch).with_binding("knx=1/1/1"))
            .build(&registry_with(Arc::clone(&binding)))
            .unwrap();

        assert!(repo.find("good").unwrap().binding().is_some());
        assert!(repo.find("bad").unwrap().binding().is_none());
        assert!(repo.find("other").unwrap().binding().is_none());
        assert_eq!(*binding.configured.lock().unwrap(), vec!["good"]);
    }

    #[test]
    fn should_start_list_cursor_on_first_child() {
        let repo = Repository::builder()
            .item(ItemDefinition::new("a", ItemKind::Switch))
            .item(ItemDefinition::new("b", ItemKind::Switch))
            .item(
                ItemDefinition::new("scenes", ItemKind::Group)
                    .as_list()
                    .with_children(["a", "b"]),
            )
            .build(&BindingRegistry::default())
            .unwrap();
        let scenes = repo.find("scenes").unwrap().id();
        assert_eq!(repo.active_child(scenes).unwrap(), Some(ItemId::new(0)));
    }

    #[test]
    fn should_collect_group_subtree() {
        let repo = Repository::builder()
            .item(ItemDefinition::new("a", ItemKind::Switch))
            .item(ItemDefinition::new("b", ItemKind::Switch))
            .item(ItemDefinition::new("inner", ItemKind::Group).with_children(["b"]))
            .item(ItemDefinition::new("outer", ItemKind::Group).with_children(["a", "inner"]))
            .build(&BindingRegistry::default())
            .unwrap();
        let subtree = repo.subtree(ItemId::new(3)).unwrap();
        assert_eq!(subtree.len(), 4);
        let inner = repo.subtree(ItemId::new(2)).unwrap();
        assert_eq!(inner.len(), 2);
    }

    #[test]
    fn should_restore_only_matching_variants() {
        let repo = Repository::builder()
            .item(ItemDefinition::new("lamp", ItemKind::Switch))
            .item(ItemDefinition::new("label", ItemKind::String))
            .build(&BindingRegistry::default())
            .unwrap();

        repo.restore("lamp", ItemState::Command(Command::On)).unwrap();
        let err = repo.restore("label", ItemState::Number(1.0)).unwrap_err();
        assert!(matches!(err, HubError::TypeMismatch(_)));

        let snapshot = repo.snapshot();
        assert_eq!(
            snapshot,
            vec![
                ("lamp".to_string(), ItemState::Command(Command::On)),
                ("label".to_string(), ItemState::String(None)),
            ]
        );
    }
}
