//! Bus timing configuration (`[bus]` section of `uhab.toml`).

use std::time::Duration;

use serde::Deserialize;

use crate::click::ClickTimings;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bounded capacity of the bus queue.
    pub queue_size: usize,
    /// Window after a release in which another press continues a multi-click.
    pub click_timelen_ms: u64,
    /// Press duration above which a single press counts as a long click.
    pub longclick_timelen_ms: u64,
    /// Hold duration after which a held contact raises LONGPRESS.
    pub longpress_timelen_ms: u64,
    /// How long `wait_for_changes` blocks before timing out.
    pub waitchanges_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            click_timelen_ms: 200,
            longclick_timelen_ms: 1000,
            longpress_timelen_ms: 500,
            waitchanges_timeout_ms: 60_000,
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn click_timings(&self) -> ClickTimings {
        ClickTimings {
            click: Duration::from_millis(self.click_timelen_ms),
            longclick: Duration::from_millis(self.longclick_timelen_ms),
            longpress: Duration::from_millis(self.longpress_timelen_ms),
        }
    }

    #[must_use]
    pub fn waitchanges_timeout(&self) -> Duration {
        Duration::from_millis(self.waitchanges_timeout_ms)
    }
}
