//! Virtual bus: the single path through which item state changes.
//!
//! Producers (bindings, rules, clients) call [`Bus::update`] to enqueue a
//! state for an item. One worker task drains the queue in FIFO order,
//! classifies each event, runs the rule processor, commits the state and
//! wakes waiters. [`Bus::send`] is the command path: it resolves TOGGLE,
//! fans out over groups and routes to the item's binding.

mod dispatcher;

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use uhab_domain::error::{HubError, ResourceExhausted};
use uhab_domain::item::ItemId;
use uhab_domain::rule_event::RuleEvent;
use uhab_domain::state::{Command, ItemState};

use crate::config::BusConfig;
use crate::ports::{RuleProcessor, WatchScope};
use crate::repository::{Item, Repository};
use crate::wait_registry::{WaitOutcome, WaitRegistry};

use self::dispatcher::Dispatcher;

/// An item state travelling through the bus queue.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub item: ItemId,
    pub state: ItemState,
}

#[derive(Debug)]
pub(crate) enum BusMessage {
    Update(BusEvent),
    ClickDeadline { item: ItemId, generation: u64 },
    Lifecycle(RuleEvent),
    Shutdown,
}

struct BusInner {
    sender: mpsc::Sender<BusMessage>,
    repository: Arc<Repository>,
    waiters: WaitRegistry,
    config: BusConfig,
}

/// Cheaply cloneable handle to the bus.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("items", &self.inner.repository.len())
            .field("queue_capacity", &self.inner.sender.max_capacity())
            .field("waiters", &self.inner.waiters)
            .finish()
    }
}

impl Bus {
    /// Create the bus queue and spawn its worker.
    ///
    /// The returned handle completes after [`Bus::shutdown`].
    pub fn start(
        repository: Arc<Repository>,
        rules: Arc<dyn RuleProcessor>,
        config: BusConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let bus = Self {
            inner: Arc::new(BusInner {
                sender,
                repository,
                waiters: WaitRegistry::default(),
                config,
            }),
        };
        let dispatcher = Dispatcher::new(bus.clone(), rules, receiver);
        let handle = tokio::spawn(dispatcher.run());
        (bus, handle)
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<Repository> {
        &self.inner.repository
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn waiters(&self) -> &WaitRegistry {
        &self.inner.waiters
    }

    /// Enqueue a state for `item`. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ResourceExhausted`] when the queue is full and
    /// [`HubError::Closed`] after shutdown.
    pub fn update(&self, item: ItemId, state: &ItemState) -> Result<(), HubError> {
        self.inner.repository.item(item)?;
        self.enqueue(BusMessage::Update(BusEvent {
            item,
            state: state.clone(),
        }))
    }

    /// Issue a command to `item`.
    ///
    /// Non-list groups forward to every child, recursively; every child is
    /// attempted and the first failure is returned. Anything else goes to
    /// the item's binding, or straight to [`Bus::update`] when unbound.
    ///
    /// # Errors
    ///
    /// Propagates lookup, queue and binding errors.
    pub fn send(&self, item: ItemId, state: &ItemState) -> Result<(), HubError> {
        let target = self.inner.repository.item(item)?;
        if !target.kind().is_group() || target.is_list() {
            return self.send_one(target, state);
        }
        let mut result = Ok(());
        for &child in target.children() {
            if let Err(err) = self.send(child, state) {
                tracing::warn!(%err, group = target.name(), %child, "group member rejected command");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// [`Bus::send`] addressed by item name.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when no item has this name, otherwise
    /// whatever [`Bus::send`] returns.
    pub fn send_by_name(&self, name: &str, state: &ItemState) -> Result<(), HubError> {
        let id = self.inner.repository.find(name)?.id();
        self.send(id, state)
    }

    /// Block until an item in `scope` is committed, or the configured
    /// `waitchanges` timeout elapses.
    pub async fn wait_for_changes(&self, scope: Arc<dyn WatchScope>) -> WaitOutcome {
        self.inner
            .waiters
            .wait(scope, self.inner.config.waitchanges_timeout())
            .await
    }

    /// Queue the START lifecycle event for every item. Call once after all
    /// bindings have started.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ResourceExhausted`] when the bus queue is full
    /// and [`HubError::Closed`] after shutdown.
    pub fn announce_start(&self) -> Result<(), HubError> {
        self.enqueue(BusMessage::Lifecycle(RuleEvent::Start))
    }

    /// Queue STOP for every item, then stop the worker once everything
    /// queued before has been handled.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        for message in [BusMessage::Lifecycle(RuleEvent::Stop), BusMessage::Shutdown] {
            self.inner
                .sender
                .send(message)
                .await
                .map_err(|_| HubError::Closed("bus"))?;
        }
        Ok(())
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<BusMessage> {
        self.inner.sender.clone()
    }

    fn send_one(&self, item: &Item, state: &ItemState) -> Result<(), HubError> {
        let resolved;
        let state = match state {
            ItemState::Command(Command::Toggle) => match self.inner.repository.command(item.id()) {
                Ok(current) => {
                    resolved = ItemState::Command(current.toggled());
                    &resolved
                }
                Err(_) => state,
            },
            _ => state,
        };
        match item.binding() {
            Some(binding) => binding.send_command(self, item, state),
            None => self.update(item.id(), state),
        }
    }

    fn enqueue(&self, message: BusMessage) -> Result<(), HubError> {
        self.inner
            .sender
            .try_send(message)
            .map_err(|err| match err {
                TrySendError::Full(_) => ResourceExhausted {
                    resource: "bus queue",
                }
                .into(),
                TrySendError::Closed(_) => HubError::Closed("bus"),
            })
    }
}
