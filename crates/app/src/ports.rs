//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the hub core and the outside world.
//! They are defined here (in `app`) so that both the core and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod automation;
pub mod binding;
pub mod scope;
pub mod state_store;

pub use automation::RuleProcessor;
pub use binding::Binding;
pub use scope::{AllItems, ItemSet, WatchScope};
pub use state_store::StateStore;
