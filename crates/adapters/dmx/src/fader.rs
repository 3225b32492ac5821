//! Linear fader moving one channel level towards a target, tick by tick.
//!
//! A fade of `fadetime` with a tick of `tick` lasts `fadetime / tick` ticks
//! (at least one). The step is the integer share of the distance per tick,
//! never less than one level; the last tick clamps onto the target so a fade
//! neither overshoots nor stops short. A periodical fader never finishes: at
//! each end it reverses between zero and its maximum.

use std::time::Duration;

/// Highest DMX channel level.
pub const MAX_LEVEL: u8 = u8::MAX;

/// Level produced by one [`Fader::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeTick {
    Running(u8),
    Finished(u8),
}

impl FadeTick {
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::Running(level) | Self::Finished(level) => level,
        }
    }

    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fader {
    step: i16,
    remaining: u32,
    total: u32,
    target: u8,
    /// Upper bound of a periodical sweep.
    sweep: Option<u8>,
}

impl Fader {
    /// Fade once from `current` to `target`.
    #[must_use]
    pub fn one_shot(current: u8, target: u8, fadetime: Duration, tick: Duration) -> Self {
        let total = tick_count(fadetime, tick);
        Self {
            step: step_towards(current, target, total),
            remaining: total,
            total,
            target,
            sweep: None,
        }
    }

    /// Sweep between zero and `max` until cancelled, starting towards `max`
    /// unless already there.
    #[must_use]
    pub fn periodical(current: u8, max: u8, fadetime: Duration, tick: Duration) -> Self {
        let first = if current >= max { 0 } else { max };
        Self {
            sweep: Some(max),
            ..Self::one_shot(current, first, fadetime, tick)
        }
    }

    #[must_use]
    pub fn is_descending(&self) -> bool {
        self.step < 0
    }

    #[must_use]
    pub fn is_periodical(&self) -> bool {
        self.sweep.is_some()
    }

    #[must_use]
    pub fn target(&self) -> u8 {
        self.target
    }

    /// Advance one tick from `current`.
    pub fn tick(&mut self, current: u8) -> FadeTick {
        self.remaining = self.remaining.saturating_sub(1);
        let next = i16::from(current) + self.step;
        let target = i16::from(self.target);
        let reached = if self.step >= 0 {
            next >= target
        } else {
            next <= target
        };
        if !reached && self.remaining > 0 {
            return FadeTick::Running(u8::try_from(next).unwrap_or(self.target));
        }

        let level = self.target;
        match self.sweep {
            Some(max) => {
                self.reverse(max);
                FadeTick::Running(level)
            }
            None => FadeTick::Finished(level),
        }
    }

    fn reverse(&mut self, max: u8) {
        let magnitude = step_magnitude(max, self.total);
        if self.step >= 0 {
            self.target = 0;
            self.step = -magnitude;
        } else {
            self.target = max;
            self.step = magnitude;
        }
        self.remaining = self.total;
    }
}

fn tick_count(fadetime: Duration, tick: Duration) -> u32 {
    let tick = tick.as_millis().max(1);
    u32::try_from(fadetime.as_millis() / tick)
        .unwrap_or(u32::MAX)
        .max(1)
}

fn step_magnitude(distance: u8, total: u32) -> i16 {
    let magnitude = (u32::from(distance) / total).max(1);
    i16::try_from(magnitude).unwrap_or(i16::MAX)
}

fn step_towards(current: u8, target: u8, total: u32) -> i16 {
    let magnitude = step_magnitude(current.abs_diff(target), total);
    if target >= current {
        magnitude
    } else {
        -magnitude
    }
}
