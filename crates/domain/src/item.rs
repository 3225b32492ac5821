//! Items: the named, typed state holders the hub is built around.
//!
//! The set of items is fixed at startup. Each item has a kind that decides
//! the variant of its initial state, an optional stereotype, and, for groups,
//! an ordered list of children referenced by name in configuration.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::state::{Command, ItemState};

/// UTC timestamp of an item's last committed change.
pub type Timestamp = DateTime<Utc>;

/// Position of an item in the repository; stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(usize);

impl ItemId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    System,
    Switch,
    Contact,
    Number,
    Group,
    String,
    Dimmer,
    Timer,
    Scene,
    Color,
    Rollershutter,
}

impl ItemKind {
    /// The state an item of this kind holds before anything is committed.
    #[must_use]
    pub fn initial_state(self) -> ItemState {
        match self {
            Self::Switch | Self::Contact | Self::Group => ItemState::Command(Command::Off),
            Self::Number | Self::Dimmer | Self::Rollershutter => ItemState::Number(0.0),
            Self::String => ItemState::String(None),
            Self::System | Self::Timer | Self::Scene | Self::Color => ItemState::None,
        }
    }

    #[must_use]
    pub fn is_group(self) -> bool {
        self == Self::Group
    }
}

/// Secondary classification altering the bus behaviour of a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stereotype {
    #[default]
    None,
    /// Exactly one child is active; UP/DOWN/Number move the cursor.
    List,
}

/// Static description of one item, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub stereotype: Stereotype,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    /// Full binding line, e.g. `dmx=stage:1,2 ON=500:255 OFF=500:0`.
    #[serde(default)]
    pub binding: Option<String>,
}

impl ItemDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            kind,
            stereotype: Stereotype::None,
            label: None,
            children: Vec::new(),
            binding: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    #[must_use]
    pub fn as_list(mut self) -> Self {
        self.stereotype = Stereotype::List;
        self
    }

    /// Check the invariants that do not need the rest of the item set.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !self.children.is_empty() && !self.kind.is_group() {
            return Err(ValidationError::ChildrenOnNonGroup(self.name.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_pre_type_initial_states_by_kind() {
        assert_eq!(
            ItemKind::Contact.initial_state(),
            ItemState::Command(Command::Off)
        );
        assert_eq!(ItemKind::Dimmer.initial_state(), ItemState::Number(0.0));
        assert_eq!(ItemKind::String.initial_state(), ItemState::String(None));
        assert_eq!(ItemKind::Scene.initial_state(), ItemState::None);
    }

    #[test]
    fn should_reject_empty_name() {
        let def = ItemDefinition::new("  ", ItemKind::Switch);
        assert_eq!(def.validate(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn should_reject_children_on_non_group() {
        let def = ItemDefinition::new("lamp", ItemKind::Switch).with_children(["a"]);
        assert_eq!(
            def.validate(),
            Err(ValidationError::ChildrenOnNonGroup("lamp".into()))
        );
    }

    #[test]
    fn should_deserialize_item_from_toml() {
        let def: ItemDefinition = toml::from_str(
            r#"
            name = "scenes"
            kind = "group"
            stereotype = "list"
            children = ["off", "evening"]
            "#,
        )
        .unwrap();
        assert_eq!(def.stereotype, Stereotype::List);
        assert_eq!(def.children, vec!["off", "evening"]);
        assert!(def.binding.is_none());
        assert!(def.validate().is_ok());
    }
}
