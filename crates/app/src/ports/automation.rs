//! Rule processor port.

use uhab_domain::error::HubError;
use uhab_domain::rule_event::RuleEvent;
use uhab_domain::state::ItemState;

use crate::bus::Bus;
use crate::repository::Item;

/// Receives every rule event the bus worker raises.
///
/// Called on the bus worker, before the new state is committed, so the
/// repository still shows the previous state of `item`. Implementations
/// may call [`Bus::send`] but must not wait on the bus.
pub trait RuleProcessor: Send + Sync {
    fn process_event(
        &self,
        bus: &Bus,
        event: RuleEvent,
        item: &Item,
        new_state: &ItemState,
    ) -> Result<(), HubError>;
}

impl<F> RuleProcessor for F
where
    F: Fn(&Bus, RuleEvent, &Item, &ItemState) -> Result<(), HubError> + Send + Sync,
{
    fn process_event(
        &self,
        bus: &Bus,
        event: RuleEvent,
        item: &Item,
        new_state: &ItemState,
    ) -> Result<(), HubError> {
        self(bus, event, item, new_state)
    }
}
