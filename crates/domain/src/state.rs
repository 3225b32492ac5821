//! Item states and the commands they carry.
//!
//! An [`ItemState`] is a tagged value: nothing, a [`Command`], a number or an
//! optional string. The variant is fixed when the item is created and typed
//! accessors fail with [`TypeMismatch`] instead of reinterpreting the value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeMismatch;

/// A discrete command word carried by switch-like items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Off,
    On,
    Toggle,
    Up,
    Down,
    Start,
    Stop,
}

impl Command {
    /// The command a TOGGLE resolves to when the current command is `self`.
    ///
    /// `ON` becomes `OFF`; every other command becomes `ON`.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            _ => Self::On,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
            Self::Toggle => "TOGGLE",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Start => "START",
            Self::Stop => "STOP",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a word is not one of the known commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command `{0}`")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Off,
            Self::On,
            Self::Toggle,
            Self::Up,
            Self::Down,
            Self::Start,
            Self::Stop,
        ]
        .into_iter()
        .find(|command| command.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// The variant tag of an [`ItemState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    None,
    Command,
    Number,
    String,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Command => "command",
            Self::Number => "number",
            Self::String => "string",
        })
    }
}

/// The value held by an item, or carried by a bus event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ItemState {
    #[default]
    None,
    Command(Command),
    Number(f64),
    String(Option<String>),
}

impl ItemState {
    #[must_use]
    pub fn kind(&self) -> StateKind {
        match self {
            Self::None => StateKind::None,
            Self::Command(_) => StateKind::Command,
            Self::Number(_) => StateKind::Number,
            Self::String(_) => StateKind::String,
        }
    }

    /// Interpret free text: a command word, then a number, then a string.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Ok(command) = text.parse::<Command>() {
            return Self::Command(command);
        }
        if let Ok(number) = text.parse::<f64>() {
            return Self::Number(number);
        }
        Self::String(Some(text.to_string()))
    }

    pub fn as_command(&self) -> Result<Command, TypeMismatch> {
        match self {
            Self::Command(command) => Ok(*command),
            other => Err(other.mismatch(StateKind::Command)),
        }
    }

    pub fn as_number(&self) -> Result<f64, TypeMismatch> {
        match self {
            Self::Number(number) => Ok(*number),
            other => Err(other.mismatch(StateKind::Number)),
        }
    }

    pub fn as_string(&self) -> Result<Option<&str>, TypeMismatch> {
        match self {
            Self::String(text) => Ok(text.as_deref()),
            other => Err(other.mismatch(StateKind::String)),
        }
    }

    pub fn set_command(&mut self, command: Command) {
        *self = Self::Command(command);
    }

    pub fn set_number(&mut self, number: f64) {
        *self = Self::Number(number);
    }

    pub fn set_string(&mut self, text: impl Into<String>) {
        *self = Self::String(Some(text.into()));
    }

    /// Drop any owned string content and reset to [`ItemState::None`].
    pub fn release(&mut self) {
        *self = Self::None;
    }

    /// Whether moving from `self` to `other` is a change.
    ///
    /// States of different variants always differ. Two absent strings are
    /// equal, an absent and a present string are not. `NaN` equals itself so
    /// that comparing a state with itself never reports a change.
    #[must_use]
    pub fn is_changed(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => false,
            (Self::Command(a), Self::Command(b)) => a != b,
            (Self::Number(a), Self::Number(b)) => !(a == b || (a.is_nan() && b.is_nan())),
            (Self::String(a), Self::String(b)) => a != b,
            _ => true,
        }
    }

    fn mismatch(&self, expected: StateKind) -> TypeMismatch {
        TypeMismatch {
            expected,
            actual: self.kind(),
        }
    }
}

impl From<Command> for ItemState {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<f64> for ItemState {
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("NONE"),
            Self::Command(command) => command.fmt(f),
            Self::Number(number) => write!(f, "{number}"),
            Self::String(Some(text)) => f.write_str(text),
            Self::String(None) => f.write_str("NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_toggle_on_to_off_and_anything_else_to_on() {
        assert_eq!(Command::On.toggled(), Command::Off);
        assert_eq!(Command::Off.toggled(), Command::On);
        assert_eq!(Command::Up.toggled(), Command::On);
    }

    #[test]
    fn should_parse_commands_case_insensitively() {
        assert_eq!("on".parse::<Command>(), Ok(Command::On));
        assert_eq!("Toggle".parse::<Command>(), Ok(Command::Toggle));
        assert_eq!(
            "blink".parse::<Command>(),
            Err(UnknownCommand("blink".into()))
        );
    }

    #[test]
    fn should_report_change_between_different_variants() {
        let on = ItemState::Command(Command::On);
        let zero = ItemState::Number(0.0);
        assert!(on.is_changed(&zero));
        assert!(ItemState::None.is_changed(&on));
    }

    #[test]
    fn should_never_report_change_against_itself() {
        let states = [
            ItemState::None,
            ItemState::Command(Command::Off),
            ItemState::Number(21.5),
            ItemState::Number(f64::NAN),
            ItemState::String(None),
            ItemState::String(Some("hello".into())),
        ];
        for state in &states {
            assert!(!state.is_changed(state), "{state:?} changed against itself");
        }
    }

    #[test]
    fn should_compare_strings_by_content_and_presence() {
        let absent = ItemState::String(None);
        let hello = ItemState::String(Some("hello".into()));
        assert!(absent.is_changed(&hello));
        assert!(hello.is_changed(&ItemState::String(Some("world".into()))));
        assert!(!hello.is_changed(&ItemState::String(Some("hello".into()))));
    }

    #[test]
    fn should_fail_typed_access_on_other_variant() {
        let state = ItemState::Number(3.0);
        let err = state.as_command().unwrap_err();
        assert_eq!(err.expected, StateKind::Command);
        assert_eq!(err.actual, StateKind::Number);
        assert_eq!(state.as_number(), Ok(3.0));
    }

    #[test]
    fn should_replace_string_content_and_release_it() {
        let mut state = ItemState::String(None);
        state.set_string("first");
        state.set_string("second");
        assert_eq!(state.as_string(), Ok(Some("second")));
        state.release();
        assert_eq!(state, ItemState::None);
    }

    #[test]
    fn should_parse_free_text_by_precedence() {
        assert_eq!(ItemState::parse("ON"), ItemState::Command(Command::On));
        assert_eq!(ItemState::parse(" 42 "), ItemState::Number(42.0));
        assert_eq!(
            ItemState::parse("dinner"),
            ItemState::String(Some("dinner".into()))
        );
    }

    #[test]
    fn should_display_numbers_without_trailing_zero() {
        assert_eq!(ItemState::Number(50.0).to_string(), "50");
        assert_eq!(ItemState::Number(12.5).to_string(), "12.5");
        assert_eq!(ItemState::Command(Command::Stop).to_string(), "STOP");
    }

    #[test]
    fn should_serialize_as_tagged_json() {
        let json = serde_json::to_string(&ItemState::Command(Command::On)).unwrap();
        assert_eq!(json, r#"{"type":"command","value":"ON"}"#);
        let back: ItemState = serde_json::from_str(r#"{"type":"number","value":7.5}"#).unwrap();
        assert_eq!(back, ItemState::Number(7.5));
    }
}
