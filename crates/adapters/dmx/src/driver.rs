//! The DMX side of the poll loop: executes item commands, runs faders and
//! sends one frame per interface on every poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use uhab_app::bus::Bus;
use uhab_app::poll_loop::PollDriver;
use uhab_domain::item::ItemId;
use uhab_domain::state::{Command, ItemState};

use crate::error::DmxError;
use crate::fader::{Fader, MAX_LEVEL};
use crate::fixture::{ActiveFade, Fixture, FixtureState};
use crate::port::DmxPort;

/// Work queued by [`crate::DmxBinding::send_command`].
#[derive(Debug, Clone)]
pub(crate) struct Execute {
    pub item: ItemId,
    pub state: ItemState,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FadeTiming {
    pub tick: Duration,
    pub periodical_fadetime: Duration,
    pub periodical_update: Duration,
}

/// One opened interface and the items it carries.
pub(crate) struct Output {
    pub name: String,
    pub port: Box<dyn DmxPort>,
    pub interval: Duration,
    /// Channels per frame, start code excluded.
    pub length: usize,
    pub fixtures: Vec<Arc<Fixture>>,
}

pub(crate) struct DmxDriver {
    bus: Bus,
    timing: FadeTiming,
    outputs: Vec<Output>,
    routes: HashMap<ItemId, usize>,
    generation: u64,
}

impl DmxDriver {
    pub fn new(bus: Bus, timing: FadeTiming, outputs: Vec<Output>) -> Self {
        let routes = outputs
            .iter()
            .enumerate()
            .flat_map(|(index, output)| output.fixtures.iter().map(move |f| (f.item, index)))
            .collect();
        Self {
            bus,
            timing,
            outputs,
            routes,
            generation: 0,
        }
    }

    fn fixture(&self, output: usize, item: ItemId) -> Option<Arc<Fixture>> {
        self.outputs[output]
            .fixtures
            .iter()
            .find(|f| f.item == item)
            .cloned()
    }

    fn execute(&mut self, fixture: &Arc<Fixture>, state: &ItemState) -> Result<(), DmxError> {
        let level = {
            let mut guard = fixture.lock();
            match state {
                ItemState::Command(command) => self.execute_command(fixture, &mut guard, *command)?,
                ItemState::Number(percent) => {
                    let level = percent_to_level(*percent);
                    let command = if level > 0 { Command::On } else { Command::Off };
                    guard.preset_mut(command).levels[0] = level;
                    self.apply_preset(fixture, &mut guard, command);
                    Some(level)
                }
                other => return Err(DmxError::unsupported_state(other.kind())),
            }
        };
        if let Some(level) = level
            && let Err(err) = self
                .bus
                .update(fixture.item, &ItemState::Number(level_to_percent(level)))
        {
            tracing::warn!(%err, item = %fixture.name, "failed to report DMX level");
        }
        Ok(())
    }

    /// Returns the level to report, if any.
    fn execute_command(
        &mut self,
        fixture: &Arc<Fixture>,
        state: &mut FixtureState,
        command: Command,
    ) -> Result<Option<u8>, DmxError> {
        let command = match command {
            Command::On | Command::Off => command,
            Command::Toggle => {
                if state.values[0] == 0 {
                    let on = state.preset_mut(Command::On);
                    if on.levels[0] == 0 {
                        on.levels[0] = on.defaults[0];
                    }
                    Command::On
                } else if state.is_fading_down() {
                    Command::On
                } else {
                    Command::Off
                }
            }
            Command::Start => {
                let on = state.preset_mut(Command::On);
                on.levels[0] = on.defaults[0];
                let max = on.levels[0];
                let fader = Fader::periodical(
                    state.values[0],
                    max,
                    self.timing.periodical_fadetime,
                    self.timing.tick,
                );
                self.start_fade(fixture, state, fader);
                return Ok(Some(max));
            }
            Command::Stop => {
                if !state.is_sweeping() {
                    tracing::debug!(item = %fixture.name, "STOP without a running sweep");
                    return Ok(None);
                }
                state.cancel_fade();
                let level = state.values[0];
                state.preset_mut(Command::On).levels[0] = level;
                return Ok(Some(level));
            }
            other => return Err(DmxError::Unsupported(other.to_string())),
        };
        self.apply_preset(fixture, state, command);
        Ok(Some(state.preset_mut(command).levels[0]))
    }

    fn apply_preset(&mut self, fixture: &Arc<Fixture>, state: &mut FixtureState, command: Command) {
        let preset = state.preset_mut(command).clone();
        let first = usize::from(!preset.fadetime.is_zero());
        for (value, level) in state.values.iter_mut().zip(&preset.levels).skip(first) {
            *value = *level;
        }
        if preset.fadetime.is_zero() {
            state.cancel_fade();
        } else {
            let fader = Fader::one_shot(
                state.values[0],
                preset.levels[0],
                preset.fadetime,
                self.timing.tick,
            );
            self.start_fade(fixture, state, fader);
        }
    }

    fn start_fade(&mut self, fixture: &Arc<Fixture>, state: &mut FixtureState, fader: Fader) {
        state.cancel_fade();
        self.generation += 1;
        let task = tokio::spawn(run_fade(
            Arc::clone(fixture),
            self.bus.clone(),
            self.generation,
            self.timing,
        ));
        state.fade = Some(ActiveFade {
            fader,
            generation: self.generation,
            task,
        });
    }

    fn write(&mut self, output: usize) {
        let output = &mut self.outputs[output];
        let mut frame = vec![0u8; output.length + 1];
        for fixture in &output.fixtures {
            let state = fixture.lock();
            for (channel, value) in fixture.channels.iter().zip(&state.values) {
                if let Some(slot) = frame.get_mut(usize::from(*channel)) {
                    *slot = *value;
                }
            }
        }
        if let Err(err) = output.port.write_frame(&frame) {
            tracing::warn!(%err, device = %output.name, "failed to send DMX frame");
        }
    }
}

impl PollDriver for DmxDriver {
    type Command = Execute;

    fn name(&self) -> &'static str {
        "dmx"
    }

    fn poll_intervals(&self) -> Vec<Duration> {
        self.outputs.iter().map(|o| o.interval).collect()
    }

    fn apply(&mut self, command: Execute) -> Option<usize> {
        let output = *self.routes.get(&command.item)?;
        let fixture = self.fixture(output, command.item)?;
        if let Err(err) = self.execute(&fixture, &command.state) {
            tracing::warn!(%err, item = %fixture.name, state = %command.state, "DMX command failed");
        }
        self.write(output);
        Some(output)
    }

    fn poll(&mut self, device: usize) {
        self.write(device);
    }
}

/// Steps the first channel of `fixture` until the fade finishes or another
/// command replaces it. Sweeps report their level at most once per
/// `periodical_update`.
async fn run_fade(fixture: Arc<Fixture>, bus: Bus, generation: u64, timing: FadeTiming) {
    let mut ticker = tokio::time::interval_at(Instant::now() + timing.tick, timing.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_report = Instant::now();

    loop {
        ticker.tick().await;
        let (level, periodical, finished) = {
            let mut state = fixture.lock();
            let current = state.values[0];
            let Some(fade) = state.fade.as_mut().filter(|f| f.generation == generation) else {
                return;
            };
            let tick = fade.fader.tick(current);
            let periodical = fade.fader.is_periodical();
            state.values[0] = tick.level();
            if tick.is_finished() {
                state.fade = None;
            }
            (tick.level(), periodical, tick.is_finished())
        };

        let now = Instant::now();
        if periodical && now >= next_report {
            next_report = now + timing.periodical_update;
            if let Err(err) = bus.update(fixture.item, &ItemState::Number(level_to_percent(level))) {
                tracing::warn!(%err, item = %fixture.name, "failed to report sweep level");
            }
        }
        if finished {
            tracing::trace!(item = %fixture.name, level, "fade finished");
            return;
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent_to_level(percent: f64) -> u8 {
    if percent.is_nan() {
        return 0;
    }
    (percent.clamp(0.0, 100.0) * f64::from(MAX_LEVEL) / 100.0).round() as u8
}

fn level_to_percent(level: u8) -> f64 {
    (f64::from(level) * 100.0 / f64::from(MAX_LEVEL)).round()
}
