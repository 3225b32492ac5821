//! Restore and save item state snapshots through a [`StateStore`].

use uhab_domain::error::HubError;

use crate::ports::StateStore;
use crate::repository::Repository;

/// Seed the repository from the store before the bus starts.
///
/// Unknown names and variant changes (an item whose kind changed since the
/// snapshot) are skipped with a warning. Returns the number restored.
///
/// # Errors
///
/// Returns the store's error when loading fails.
#[tracing::instrument(skip_all)]
pub async fn restore<S: StateStore>(repository: &Repository, store: &S) -> Result<usize, HubError> {
    let stored = store.load().await?;
    let mut restored = 0;
    for (name, state) in stored {
        match repository.restore(&name, state) {
            Ok(()) => restored += 1,
            Err(err) => tracing::warn!(%err, item = %name, "stored state skipped"),
        }
    }
    tracing::info!(restored, "item states restored");
    Ok(restored)
}

/// Save the current snapshot.
///
/// # Errors
///
/// Returns the store's error when saving fails.
#[tracing::instrument(skip_all)]
pub async fn persist<S: StateStore>(repository: &Repository, store: &S) -> Result<usize, HubError> {
    let snapshot = repository.snapshot();
    store.save(&snapshot).await?;
    tracing::debug!(saved = snapshot.len(), "item states saved");
    Ok(snapshot.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::binding_registry::BindingRegistry;
    use crate::ports::state_store::StoredState;
    use uhab_domain::item::{ItemDefinition, ItemKind};
    use uhab_domain::state::{Command, ItemState};

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<StoredState>>,
    }

    impl StateStore for MemoryStore {
        async fn load(&self) -> Result<Vec<StoredState>, HubError> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn save(&self, states: &[StoredState]) -> Result<(), HubError> {
            *self.rows.lock().unwrap() = states.to_vec();
            Ok(())
        }
    }

    fn repository() -> Repository {
        Repository::builder()
            .item(ItemDefinition::new("lamp", ItemKind::Switch))
            .item(ItemDefinition::new("level", ItemKind::Dimmer))
            .build(&BindingRegistry::default())
            .unwrap()
    }

    #[tokio::test]
    async fn should_restore_matching_states_and_skip_the_rest() {
        let store = MemoryStore::default();
        *store.rows.lock().unwrap() = vec![
            ("lamp".into(), ItemState::Command(Command::On)),
            ("level".into(), ItemState::Command(Command::On)),
            ("removed".into(), ItemState::Number(1.0)),
        ];
        let repository = repository();

        let restored = restore(&repository, &store).await.unwrap();

        assert_eq!(restored, 1);
        assert_eq!(
            repository.state(repository.find("lamp").unwrap().id()).unwrap(),
            ItemState::Command(Command::On)
        );
    }

    #[tokio::test]
    async fn should_save_snapshot() {
        let store = MemoryStore::default();
        let saved = persist(&repository(), &store).await.unwrap();
        assert_eq!(saved, 2);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }
}
