//! Wait-for-changes registry.
//!
//! Clients (a UI long-poll, a script) block until an item inside their watch
//! scope is committed, or until a timeout. Entries are pooled: a finished
//! wait marks its entry inactive and the next wait reuses it. Each entry
//! owns a binary semaphore; wakes never stack more than one permit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;

use uhab_domain::item::ItemId;

use crate::ports::WatchScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Changed,
    TimedOut,
}

struct WaitEntry {
    active: bool,
    scope: Option<Arc<dyn WatchScope>>,
    wake: Arc<Semaphore>,
}

#[derive(Default)]
pub struct WaitRegistry {
    entries: Mutex<Vec<WaitEntry>>,
}

impl std::fmt::Debug for WaitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.lock();
        f.debug_struct("WaitRegistry")
            .field("entries", &entries.len())
            .field("active", &entries.iter().filter(|e| e.active).count())
            .finish()
    }
}

/// Releases the entry on every exit path, including cancellation.
struct Lease<'a> {
    registry: &'a WaitRegistry,
    slot: usize,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.registry.lock().get_mut(self.slot) {
            entry.active = false;
            entry.scope = None;
        }
    }
}

impl WaitRegistry {
    /// Block until an item in `scope` changes or `timeout` elapses.
    pub async fn wait(&self, scope: Arc<dyn WatchScope>, timeout: Duration) -> WaitOutcome {
        let (lease, wake) = self.acquire(scope);
        let outcome = match tokio::time::timeout(timeout, wake.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                WaitOutcome::Changed
            }
            Ok(Err(_)) | Err(_) => WaitOutcome::TimedOut,
        };
        drop(lease);
        outcome
    }

    /// Wake every active waiter whose scope contains `item`.
    pub fn wake(&self, item: ItemId) {
        let entries = self.lock();
        for entry in entries.iter().filter(|e| e.active) {
            let interested = entry.scope.as_ref().is_some_and(|s| s.contains(item));
            if interested && entry.wake.available_permits() == 0 {
                entry.wake.add_permits(1);
            }
        }
    }

    /// Number of pooled entries, active or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.lock().iter().filter(|e| e.active).count()
    }

    fn acquire(&self, scope: Arc<dyn WatchScope>) -> (Lease<'_>, Arc<Semaphore>) {
        let mut entries = self.lock();
        let slot = match entries.iter().position(|e| !e.active) {
            Some(slot) => {
                let entry = &mut entries[slot];
                // a wake that raced the previous timeout leaves a stale permit
                while let Ok(permit) = entry.wake.try_acquire() {
                    permit.forget();
                }
                entry.active = true;
                entry.scope = Some(scope);
                slot
            }
            None => {
                entries.push(WaitEntry {
                    active: true,
                    scope: Some(scope),
                    wake: Arc::new(Semaphore::new(0)),
                });
                tracing::debug!(entries = entries.len(), "wait registry grown");
                entries.len() - 1
            }
        };
        let wake = Arc::clone(&entries[slot].wake);
        (
            Lease {
                registry: self,
                slot,
            },
            wake,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WaitEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
