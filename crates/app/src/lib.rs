//! # uhab-app
//!
//! Application layer: the hub core and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement:
//!   - `Binding`: a device family attached to items
//!   - `RuleProcessor`: reacts to rule events raised by the bus
//!   - `WatchScope`: the item set a waiting client cares about
//!   - `StateStore`: persists item state snapshots
//! - Own the in-process core that needs no IO:
//!   - `Repository`: the fixed item set and its runtime state
//!   - `Bus`: single-worker event queue, the only writer of item state
//!   - `PressTracker`: click / long-click / long-press classification
//!   - `WaitRegistry`: long-poll style "wait for changes"
//!   - `BindingRegistry`: binding lifecycle
//!   - `PollWorker`: command queue plus periodic device polling
//!
//! ## Dependency rule
//! Depends on `uhab-domain` only (plus `tokio` for tasks, channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod automation;
pub mod binding_registry;
pub mod bus;
pub mod click;
pub mod config;
pub mod persistence;
pub mod poll_loop;
pub mod ports;
pub mod repository;
pub mod wait_registry;
