//! Events the bus hands to the rule processor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A rule event. Rule filters use [`RuleEvent::Changed`] as a wildcard for
/// every per-item event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleEvent {
    /// A committed change that is neither ON nor OFF.
    Changed,
    On,
    Off,
    Click,
    DoubleClick,
    TripleClick,
    /// Four presses or more.
    QuadClick,
    LongClick,
    LongPress,
    /// Broadcast to every item once all bindings have started.
    Start,
    /// Broadcast to every item at shutdown.
    Stop,
}

impl RuleEvent {
    const ALL: [Self; 11] = [
        Self::Changed,
        Self::On,
        Self::Off,
        Self::Click,
        Self::DoubleClick,
        Self::TripleClick,
        Self::QuadClick,
        Self::LongClick,
        Self::LongPress,
        Self::Start,
        Self::Stop,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Changed => "CHANGED",
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Click => "CLICK",
            Self::DoubleClick => "DOUBLECLICK",
            Self::TripleClick => "TRIPLECLICK",
            Self::QuadClick => "QUADCLICK",
            Self::LongClick => "LONGCLICK",
            Self::LongPress => "LONGPRESS",
            Self::Start => "START",
            Self::Stop => "STOP",
        }
    }

    /// Whether a rule filtering on `self` fires for `event`.
    ///
    /// `CHANGED` matches every per-item event; lifecycle events only match
    /// themselves.
    #[must_use]
    pub fn matches(self, event: Self) -> bool {
        match self {
            Self::Changed => !event.is_lifecycle(),
            filter => filter == event,
        }
    }

    #[must_use]
    pub fn is_lifecycle(self) -> bool {
        matches!(self, Self::Start | Self::Stop)
    }

    /// Map a press count to its click event. Counts above four are quad
    /// clicks.
    #[must_use]
    pub fn for_click_count(count: u32) -> Option<Self> {
        match count {
            0 => None,
            1 => Some(Self::Click),
            2 => Some(Self::DoubleClick),
            3 => Some(Self::TripleClick),
            _ => Some(Self::QuadClick),
        }
    }
}

impl fmt::Display for RuleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rule event `{0}`")]
pub struct UnknownRuleEvent(pub String);

impl FromStr for RuleEvent {
    type Err = UnknownRuleEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRuleEvent(s.to_string()))
    }
}
