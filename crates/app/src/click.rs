//! Press classification for contact items.
//!
//! A contact raises ON when pressed and OFF when released. [`PressTracker`]
//! counts presses and keeps one deadline per item:
//!
//! - press: count the press and arm the deadline at `now + longpress`
//! - release: keep the deadline or push it to `now + click`, whichever is later
//! - deadline: a contact still held is a LONGPRESS; a single press held
//!   at least `longclick` is a LONGCLICK; otherwise the count maps to
//!   CLICK / DOUBLECLICK / TRIPLECLICK / QUADCLICK
//!
//! The tracker is pure: the bus worker feeds it instants and schedules the
//! deadlines it returns. Each arm bumps a generation so that a deadline
//! superseded by a later arm is ignored when it fires.

use std::time::Duration;

use tokio::time::Instant;

use uhab_domain::rule_event::RuleEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickTimings {
    pub click: Duration,
    pub longclick: Duration,
    pub longpress: Duration,
}

/// A deadline the caller must deliver back through [`PressTracker::expire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: Instant,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct PressTracker {
    deadline: Option<Instant>,
    pressed_at: Option<Instant>,
    count: u32,
    generation: u64,
}

impl PressTracker {
    /// A press (contact ON).
    pub fn press(&mut self, now: Instant, timings: &ClickTimings) -> Deadline {
        self.pressed_at = Some(now);
        self.count += 1;
        self.arm(now + timings.longpress)
    }

    /// A release (contact OFF). Ignored when no press is being timed.
    pub fn release(&mut self, now: Instant, timings: &ClickTimings) -> Option<Deadline> {
        let current = self.deadline?;
        let candidate = now + timings.click;
        (candidate > current).then(|| self.arm(candidate))
    }

    /// Resolve the deadline with the given generation.
    ///
    /// Returns `None` for superseded generations or when idle. `contact_on`
    /// is the committed state of the contact when the deadline fires.
    pub fn expire(
        &mut self,
        now: Instant,
        generation: u64,
        contact_on: bool,
        timings: &ClickTimings,
    ) -> Option<RuleEvent> {
        if self.deadline.is_none() || generation != self.generation {
            return None;
        }
        let held = self
            .pressed_at
            .map_or(Duration::ZERO, |pressed| now.saturating_duration_since(pressed));
        let event = if contact_on {
            RuleEvent::LongPress
        } else if self.count == 1 && held >= timings.longclick {
            RuleEvent::LongClick
        } else {
            RuleEvent::for_click_count(self.count)?
        };
        self.reset();
        Some(event)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.deadline.is_none()
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    fn arm(&mut self, at: Instant) -> Deadline {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = Some(at);
        Deadline {
            at,
            generation: self.generation,
        }
    }

    fn reset(&mut self) {
        self.deadline = None;
        self.pressed_at = None;
        self.count = 0;
    }
}
