//! Binding registry: lifecycle of the compiled-in bindings.

use std::fmt;
use std::sync::Arc;

use crate::bus::Bus;
use crate::ports::Binding;

/// The registered bindings and the subset that initialized successfully.
#[derive(Default)]
pub struct BindingRegistry {
    registered: Vec<Arc<dyn Binding>>,
    active: Vec<Arc<dyn Binding>>,
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |list: &[Arc<dyn Binding>]| list.iter().map(|b| b.name()).collect::<Vec<_>>();
        f.debug_struct("BindingRegistry")
            .field("registered", &names(&self.registered))
            .field("active", &names(&self.active))
            .finish()
    }
}

impl BindingRegistry {
    #[must_use]
    pub fn new(registered: Vec<Arc<dyn Binding>>) -> Self {
        Self {
            registered,
            active: Vec::new(),
        }
    }

    pub fn register(&mut self, binding: Arc<dyn Binding>) {
        self.registered.push(binding);
    }

    /// Initialize every registered binding. Failures are logged and exclude
    /// the binding from the active set; the others proceed.
    ///
    /// Returns the number of failed bindings.
    pub fn init_all(&mut self) -> usize {
        self.active.clear();
        let mut failures = 0;
        for binding in &self.registered {
            match binding.init() {
                Ok(()) => {
                    tracing::info!(binding = binding.name(), label = binding.label(), "binding initialized");
                    self.active.push(Arc::clone(binding));
                }
                Err(err) => {
                    tracing::error!(%err, binding = binding.name(), "binding failed to initialize");
                    failures += 1;
                }
            }
        }
        failures
    }

    /// Start every active binding. A failed start only affects that binding.
    ///
    /// Returns the number of failed bindings.
    pub fn start_all(&self, bus: &Bus) -> usize {
        let mut failures = 0;
        for binding in &self.active {
            match binding.start(bus) {
                Ok(()) => tracing::info!(binding = binding.name(), "binding started"),
                Err(err) => {
                    tracing::error!(%err, binding = binding.name(), "binding failed to start");
                    failures += 1;
                }
            }
        }
        failures
    }

    /// Deinitialize every active binding, in reverse order of registration.
    pub fn deinit_all(&self) {
        for binding in self.active.iter().rev() {
            if let Err(err) = binding.deinit() {
                tracing::warn!(%err, binding = binding.name(), "binding failed to deinitialize");
            }
        }
    }

    /// Look up any registered binding, active or not.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Arc<dyn Binding>> {
        self.registered.iter().find(|b| b.name() == name)
    }

    /// Look up an active binding.
    #[must_use]
    pub fn get_active(&self, name: &str) -> Option<&Arc<dyn Binding>> {
        self.active.iter().find(|b| b.name() == name)
    }

    /// The active bindings.
    #[must_use]
    pub fn all(&self) -> &[Arc<dyn Binding>] {
        &self.active
    }
}
