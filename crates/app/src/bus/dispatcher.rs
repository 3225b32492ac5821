//! The bus worker: the only place item state is committed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use uhab_domain::error::{HubError, NotFoundError};
use uhab_domain::item::{ItemId, ItemKind};
use uhab_domain::rule_event::RuleEvent;
use uhab_domain::state::{Command, ItemState};

use super::{Bus, BusEvent, BusMessage};
use crate::click::{ClickTimings, Deadline, PressTracker};
use crate::ports::RuleProcessor;
use crate::repository::Item;

#[derive(Debug, Clone, Copy)]
enum CursorMove {
    Next,
    Previous,
    Select(f64),
}

pub(super) struct Dispatcher {
    bus: Bus,
    rules: Arc<dyn RuleProcessor>,
    receiver: mpsc::Receiver<BusMessage>,
    timings: ClickTimings,
    presses: HashMap<ItemId, PressTracker>,
    timers: HashMap<ItemId, JoinHandle<()>>,
}

impl Dispatcher {
    pub(super) fn new(
        bus: Bus,
        rules: Arc<dyn RuleProcessor>,
        receiver: mpsc::Receiver<BusMessage>,
    ) -> Self {
        let timings = bus.config().click_timings();
        Self {
            bus,
            rules,
            receiver,
            timings,
            presses: HashMap::new(),
            timers: HashMap::new(),
        }
    }

    pub(super) async fn run(mut self) {
        tracing::info!(items = self.bus.repository().len(), "bus worker started");
        while let Some(message) = self.receiver.recv().await {
            match message {
                BusMessage::Update(event) => self.dispatch(event),
                BusMessage::ClickDeadline { item, generation } => self.expire(item, generation),
                BusMessage::Lifecycle(event) => self.broadcast(event),
                BusMessage::Shutdown => break,
            }
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        tracing::info!("bus worker stopped");
    }

    /// Classify, run rules, commit, wake, stamp. In that order.
    fn dispatch(&mut self, event: BusEvent) {
        let repository = Arc::clone(self.bus.repository());
        let Ok(item) = repository.item(event.item) else {
            tracing::warn!(item = %event.item, "update for unknown item dropped");
            return;
        };
        let mut state = event.state;
        let rule_event = self.classify(item, &mut state);
        self.fire(rule_event, item, &state);

        tracing::debug!(item = item.name(), %state, event = %rule_event, "item updated");
        repository.commit(item.id(), state);
        self.bus.waiters().wake(item.id());
        repository.touch(item.id(), chrono::Utc::now());
    }

    fn classify(&mut self, item: &Item, state: &mut ItemState) -> RuleEvent {
        match state {
            ItemState::Command(command) => match *command {
                Command::Toggle => match self.bus.repository().command(item.id()) {
                    Ok(current) => {
                        *command = current.toggled();
                        if *command == Command::On {
                            RuleEvent::On
                        } else {
                            RuleEvent::Off
                        }
                    }
                    Err(_) => RuleEvent::Changed,
                },
                Command::On => {
                    if item.kind() == ItemKind::Contact {
                        self.press(item.id());
                    }
                    RuleEvent::On
                }
                Command::Off => {
                    if item.kind() == ItemKind::Contact {
                        self.release(item.id());
                    }
                    RuleEvent::Off
                }
                Command::Up if item.is_list() => {
                    self.move_cursor(item, CursorMove::Next);
                    RuleEvent::Changed
                }
                Command::Down if item.is_list() => {
                    self.move_cursor(item, CursorMove::Previous);
                    RuleEvent::Changed
                }
                _ => RuleEvent::Changed,
            },
            ItemState::Number(position) if item.is_list() => {
                let position = *position;
                self.move_cursor(item, CursorMove::Select(position));
                RuleEvent::Changed
            }
            _ => RuleEvent::Changed,
        }
    }

    fn fire(&self, event: RuleEvent, item: &Item, state: &ItemState) {
        if let Err(err) = self.rules.process_event(&self.bus, event, item, state) {
            tracing::warn!(%err, item = item.name(), %event, "rule processing failed");
        }
    }

    fn broadcast(&self, event: RuleEvent) {
        let repository = Arc::clone(self.bus.repository());
        tracing::info!(%event, items = repository.len(), "broadcasting lifecycle event");
        for item in repository.items() {
            let state = repository.state(item.id()).unwrap_or_default();
            self.fire(event, item, &state);
        }
    }

    fn press(&mut self, item: ItemId) {
        let deadline = self
            .presses
            .entry(item)
            .or_default()
            .press(Instant::now(), &self.timings);
        self.schedule(item, deadline);
    }

    fn release(&mut self, item: ItemId) {
        let rearmed = self
            .presses
            .get_mut(&item)
            .and_then(|tracker| tracker.release(Instant::now(), &self.timings));
        if let Some(deadline) = rearmed {
            self.schedule(item, deadline);
        }
    }

    /// Deliver `deadline` back through the queue so it is ordered with updates.
    fn schedule(&mut self, item: ItemId, deadline: Deadline) {
        let sender = self.bus.sender();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline.at).await;
            let _ = sender
                .send(BusMessage::ClickDeadline {
                    item,
                    generation: deadline.generation,
                })
                .await;
        });
        if let Some(previous) = self.timers.insert(item, timer) {
            previous.abort();
        }
    }

    fn expire(&mut self, id: ItemId, generation: u64) {
        let repository = Arc::clone(self.bus.repository());
        let Ok(item) = repository.item(id) else {
            return;
        };
        let contact_on = repository.command(id).is_ok_and(|c| c == Command::On);
        let Some(event) = self.presses.get_mut(&id).and_then(|tracker| {
            tracker.expire(Instant::now(), generation, contact_on, &self.timings)
        }) else {
            return;
        };
        self.timers.remove(&id);

        tracing::debug!(item = item.name(), %event, "press classified");
        let state = repository.state(id).unwrap_or_default();
        self.fire(event, item, &state);
    }

    fn move_cursor(&self, group: &Item, movement: CursorMove) {
        if let Err(err) = self.try_move_cursor(group, movement) {
            tracing::warn!(%err, group = group.name(), ?movement, "list cursor not moved");
        }
    }

    fn try_move_cursor(&self, group: &Item, movement: CursorMove) -> Result<(), HubError> {
        let repository = self.bus.repository();
        let children = group.children();
        let Some(current) = repository.cursor(group.id()) else {
            return Ok(());
        };
        let len = children.len();
        let next = match movement {
            CursorMove::Next => (current + 1) % len,
            CursorMove::Previous => (current + len - 1) % len,
            CursorMove::Select(position) => child_index(position, len).ok_or_else(|| {
                NotFoundError::new("List entry", format!("{}[{position}]", group.name()))
            })?,
        };
        self.bus
            .send(children[current], &ItemState::Command(Command::Off))?;
        repository.set_cursor(group.id(), next);
        self.bus
            .send(children[next], &ItemState::Command(Command::On))
    }
}

/// Positions round up, so `0.5` selects the second entry.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn child_index(position: f64, len: usize) -> Option<usize> {
    if !position.is_finite() || position < 0.0 {
        return None;
    }
    let index = position.ceil() as usize;
    (index < len).then_some(index)
}
