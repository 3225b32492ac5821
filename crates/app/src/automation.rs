//! Declarative rule processor: `when <item> raises <event>, send <state> to <target>`.

use uhab_domain::error::HubError;
use uhab_domain::item::ItemId;
use uhab_domain::rule::RuleDefinition;
use uhab_domain::rule_event::RuleEvent;
use uhab_domain::state::ItemState;

use crate::bus::Bus;
use crate::ports::RuleProcessor;
use crate::repository::{Item, Repository};

/// Rule processor that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRules;

impl RuleProcessor for NoRules {
    fn process_event(
        &self,
        _bus: &Bus,
        _event: RuleEvent,
        _item: &Item,
        _new_state: &ItemState,
    ) -> Result<(), HubError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CompiledRule {
    item: ItemId,
    event: RuleEvent,
    target: ItemId,
    state: ItemState,
}

/// Rules resolved against the item repository.
#[derive(Debug, Default)]
pub struct DeclarativeRules {
    rules: Vec<CompiledRule>,
}

impl DeclarativeRules {
    /// Resolve item names once so that dispatch is a scan over ids.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when a rule names an unknown item.
    pub fn compile(repository: &Repository, rules: &[RuleDefinition]) -> Result<Self, HubError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    item: repository.find(&rule.item)?.id(),
                    event: rule.event,
                    target: repository.find(&rule.target)?.id(),
                    state: rule.action_state(),
                })
            })
            .collect::<Result<Vec<_>, HubError>>()?;
        tracing::info!(rules = rules.len(), "automation rules compiled");
        Ok(Self { rules })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleProcessor for DeclarativeRules {
    /// Send the action of every matching rule. All matching rules run; the
    /// first failure is returned.
    fn process_event(
        &self,
        bus: &Bus,
        event: RuleEvent,
        item: &Item,
        _new_state: &ItemState,
    ) -> Result<(), HubError> {
        let mut result = Ok(());
        for rule in self
            .rules
            .iter()
            .filter(|rule| rule.item == item.id() && rule.event.matches(event))
        {
            tracing::debug!(item = item.name(), %event, target = %rule.target, state = %rule.state, "rule fired");
            if let Err(err) = bus.send(rule.target, &rule.state)
                && result.is_ok()
            {
                result = Err(err);
            }
        }
        result
    }
}
