//! State store port: persistence of item state snapshots.

use std::future::Future;

use uhab_domain::error::HubError;
use uhab_domain::state::ItemState;

/// A persisted `(item name, state)` pair.
pub type StoredState = (String, ItemState);

/// Saves and loads item state snapshots keyed by item name.
pub trait StateStore: Send + Sync {
    /// Load every stored state.
    fn load(&self) -> impl Future<Output = Result<Vec<StoredState>, HubError>> + Send;

    /// Upsert the given states.
    fn save(&self, states: &[StoredState]) -> impl Future<Output = Result<(), HubError>> + Send;
}
