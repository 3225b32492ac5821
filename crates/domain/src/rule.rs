//! Declarative automation rules: when `item` raises `event`, send `state`
//! to `target`.

use serde::{Deserialize, Serialize};

use crate::rule_event::RuleEvent;
use crate::state::ItemState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Item whose events trigger the rule.
    pub item: String,
    pub event: RuleEvent,
    /// Item the action is sent to.
    pub target: String,
    /// Free text parsed with [`ItemState::parse`].
    pub state: String,
}

impl RuleDefinition {
    #[must_use]
    pub fn action_state(&self) -> ItemState {
        ItemState::parse(&self.state)
    }
}
