//! Items driven by the DMX binding.
//!
//! A binding line `dmx=stage:1,2 ON=500:255,128 OFF=500:0,0` drives channels
//! 1 and 2 of interface `stage`. Each command entry gives a fade time in
//! milliseconds (optional, zero for immediate) and one level per channel.
//! Missing entries default to every channel at 255 for ON and 0 for OFF,
//! applied immediately. Only the first channel fades; the others jump to
//! their level when the fade starts.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use uhab_domain::binding_config::{BindingConfig, BindingParam};
use uhab_domain::error::ConfigError;
use uhab_domain::item::ItemId;
use uhab_domain::state::Command;

use crate::error::DmxError;
use crate::fader::{Fader, MAX_LEVEL};

/// Highest addressable channel; slot 0 of a frame carries the start code.
pub const MAX_CHANNEL: u16 = 511;

/// Channels one item may drive.
pub const MAX_CHANNELS_PER_ITEM: usize = 16;

/// Levels applied by one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub command: Command,
    pub fadetime: Duration,
    pub levels: Vec<u8>,
    pub defaults: Vec<u8>,
}

impl Preset {
    fn fallback(command: Command, channels: usize) -> Self {
        let level = if command == Command::On { MAX_LEVEL } else { 0 };
        Self {
            command,
            fadetime: Duration::ZERO,
            levels: vec![level; channels],
            defaults: vec![level; channels],
        }
    }

    fn parse(param: &BindingParam, channels: usize, fadetick: Duration) -> Result<Self, DmxError> {
        let command: Command = param.key.parse().map_err(|_| ConfigError::InvalidValue {
            key: "command".into(),
            value: param.key.clone(),
        })?;
        if !matches!(command, Command::On | Command::Off) {
            return Err(DmxError::Unsupported(format!("a {command} entry")));
        }
        let fadetime = match param.parsed_value::<u64>()? {
            None | Some(0) => Duration::ZERO,
            Some(ms) => Duration::from_millis(ms).max(fadetick),
        };

        let mut preset = Self::fallback(command, channels);
        if param.params.len() > channels {
            return Err(DmxError::TooManyChannels(channels));
        }
        for index in 0..param.params.len() {
            if let Some(level) = param.param::<u8>(index)? {
                preset.levels[index] = level;
            }
        }
        preset.fadetime = fadetime;
        preset.defaults.clone_from(&preset.levels);
        Ok(preset)
    }
}

/// A parsed `dmx=` binding line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureConfig {
    pub device: String,
    pub channels: Vec<u16>,
    pub presets: Vec<Preset>,
}

impl FixtureConfig {
    /// Parse a binding line. Fade times below `fadetick` are raised to it.
    ///
    /// # Errors
    ///
    /// Returns [`DmxError`] for a missing device, an invalid channel or a
    /// malformed command entry.
    pub fn parse(config: &BindingConfig, fadetick: Duration) -> Result<Self, DmxError> {
        let head = config.head();
        let device = head
            .value
            .clone()
            .ok_or_else(|| ConfigError::MissingKey("dmx device".into()))?;
        if head.params.is_empty() {
            return Err(ConfigError::MissingKey("dmx channels".into()).into());
        }
        if head.params.len() > MAX_CHANNELS_PER_ITEM {
            return Err(DmxError::TooManyChannels(MAX_CHANNELS_PER_ITEM));
        }
        let mut channels = Vec::with_capacity(head.params.len());
        for index in 0..head.params.len() {
            let channel = head.param::<u16>(index)?.unwrap_or_default();
            if channel == 0 || channel > MAX_CHANNEL {
                return Err(DmxError::ChannelRange(channel));
            }
            channels.push(channel);
        }

        let mut presets = Vec::new();
        for option in config.options() {
            let preset = Preset::parse(option, channels.len(), fadetick)?;
            presets.retain(|p: &Preset| p.command != preset.command);
            presets.push(preset);
        }
        for command in [Command::On, Command::Off] {
            if !presets.iter().any(|p| p.command == command) {
                presets.push(Preset::fallback(command, channels.len()));
            }
        }

        Ok(Self {
            device,
            channels,
            presets,
        })
    }

    #[must_use]
    pub fn highest_channel(&self) -> u16 {
        self.channels.iter().copied().max().unwrap_or_default()
    }
}

pub(crate) struct ActiveFade {
    pub fader: Fader,
    pub generation: u64,
    pub task: JoinHandle<()>,
}

pub(crate) struct FixtureState {
    pub values: Vec<u8>,
    pub presets: Vec<Preset>,
    pub fade: Option<ActiveFade>,
}

impl FixtureState {
    pub fn preset_mut(&mut self, command: Command) -> &mut Preset {
        let index = self
            .presets
            .iter()
            .position(|p| p.command == command)
            .unwrap_or_default();
        &mut self.presets[index]
    }

    pub fn is_fading_down(&self) -> bool {
        self.fade.as_ref().is_some_and(|f| f.fader.is_descending())
    }

    pub fn is_sweeping(&self) -> bool {
        self.fade.as_ref().is_some_and(|f| f.fader.is_periodical())
    }

    pub fn cancel_fade(&mut self) {
        if let Some(fade) = self.fade.take() {
            fade.task.abort();
        }
    }
}

/// Runtime state of one configured item.
pub(crate) struct Fixture {
    pub item: ItemId,
    pub name: String,
    pub device: String,
    pub channels: Vec<u16>,
    state: Mutex<FixtureState>,
}

impl Fixture {
    pub fn new(item: ItemId, name: &str, config: FixtureConfig) -> Self {
        Self {
            item,
            name: name.to_string(),
            device: config.device,
            state: Mutex::new(FixtureState {
                values: vec![0; config.channels.len()],
                presets: config.presets,
                fade: None,
            }),
            channels: config.channels,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn values(&self) -> Vec<u8> {
        self.lock().values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(20);

    fn parse(line: &str) -> Result<FixtureConfig, DmxError> {
        FixtureConfig::parse(&line.parse().unwrap(), TICK)
    }

    fn preset(config: &FixtureConfig, command: Command) -> &Preset {
        config.presets.iter().find(|p| p.command == command).unwrap()
    }

    #[test]
    fn should_parse_channels_and_presets() {
        let config = parse("dmx=stage:1,2 ON=500:255,128 OFF=300:0,0").unwrap();
        assert_eq!(config.device, "stage");
        assert_eq!(config.channels, vec![1, 2]);
        assert_eq!(config.highest_channel(), 2);

        let on = preset(&config, Command::On);
        assert_eq!(on.fadetime, Duration::from_millis(500));
        assert_eq!(on.levels, vec![255, 128]);
        assert_eq!(on.defaults, vec![255, 128]);
        assert_eq!(preset(&config, Command::Off).fadetime, Duration::from_millis(300));
    }

    #[test]
    fn should_default_missing_presets_to_immediate_full_and_zero() {
        let config = parse("dmx=stage:7,8").unwrap();
        let on = preset(&config, Command::On);
        assert_eq!(on.fadetime, Duration::ZERO);
        assert_eq!(on.levels, vec![255, 255]);
        assert_eq!(preset(&config, Command::Off).levels, vec![0, 0]);
    }

    #[test]
    fn should_accept_levels_without_fadetime_and_pad_missing_levels() {
        let config = parse("dmx=stage:1,2,3 ON=200").unwrap();
        let on = preset(&config, Command::On);
        assert_eq!(on.fadetime, Duration::ZERO);
        assert_eq!(on.levels, vec![200, 255, 255]);
    }

    #[test]
    fn should_raise_short_fadetime_to_one_tick() {
        let config = parse("dmx=stage:1 ON=5:255").unwrap();
        assert_eq!(preset(&config, Command::On).fadetime, TICK);
    }

    #[test]
    fn should_reject_out_of_range_channel() {
        assert!(matches!(parse("dmx=stage:0"), Err(DmxError::ChannelRange(0))));
        assert!(matches!(parse("dmx=stage:512"), Err(DmxError::ChannelRange(512))));
    }

    #[test]
    fn should_reject_missing_device_or_channels() {
        assert!(matches!(parse("dmx=1,2"), Err(DmxError::Config(ConfigError::MissingKey(_)))));
        assert!(matches!(parse("dmx=stage:"), Err(DmxError::Config(ConfigError::MissingKey(_)))));
    }

    #[test]
    fn should_reject_unknown_or_unsupported_command_entries() {
        assert!(matches!(parse("dmx=stage:1 DIM=10:5"), Err(DmxError::Config(_))));
        assert!(matches!(parse("dmx=stage:1 UP=10:5"), Err(DmxError::Unsupported(_))));
    }

    #[test]
    fn should_reject_more_levels_than_channels() {
        assert!(matches!(
            parse("dmx=stage:1 ON=0:1,2"),
            Err(DmxError::TooManyChannels(1))
        ));
    }
}
